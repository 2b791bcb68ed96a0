use tokio::sync::mpsc;

use crate::action::Action;

/// Creates a connected producer/consumer pair.
pub fn action_queue() -> (ActionSender, ActionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ActionSender { tx }, ActionReceiver { rx })
}

/// The consumer half was dropped; the action was not queued.
#[derive(Debug)]
pub struct QueueClosed(pub Action);

#[derive(Debug, Clone)]
pub struct ActionSender {
    tx: mpsc::UnboundedSender<Action>,
}

impl ActionSender {
    pub fn push(&self, action: Action) -> Result<(), QueueClosed> {
        self.tx.send(action).map_err(|err| QueueClosed(err.0))
    }
}

/// Single consumer. Not `Clone`.
#[derive(Debug)]
pub struct ActionReceiver {
    rx: mpsc::UnboundedReceiver<Action>,
}

impl ActionReceiver {
    /// Waits for the next action. `None` once every producer is gone and the
    /// queue has drained.
    pub async fn pop(&mut self) -> Option<Action> {
        self.rx.recv().await
    }

    pub fn try_pop(&mut self) -> Option<Action> {
        self.rx.try_recv().ok()
    }
}
