//! Sole consumer of the action queue.
//!
//! Broadcast actions go to every registered subscriber in registration
//! order; a resync goes to its target only. A failed delivery is logged and
//! skipped for that subscriber alone: the remaining subscribers still receive
//! the action, and nothing is retried or re-queued.

use std::{future::Future, sync::Arc};

use tokio::select;
use tracing::{debug, info, warn};

use crate::{
    action::{Action, Outbound},
    queue::ActionReceiver,
    registry::{DeliveryFailure, SubscriberRegistry},
};

/// Counters returned when the dispatcher stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub actions: u64,
    pub deliveries: u64,
    pub failures: u64,
}

pub struct Dispatcher {
    queue: ActionReceiver,
    registry: Arc<SubscriberRegistry>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(queue: ActionReceiver, registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            queue,
            registry,
            stats: DispatchStats::default(),
        }
    }

    /// Runs until every producer of the queue has been dropped.
    pub async fn run(self) -> DispatchStats {
        self.run_until(std::future::pending()).await
    }

    /// Runs until `shutdown` resolves or the queue closes. Actions still
    /// queued at that point are dropped.
    pub async fn run_until<F>(mut self, shutdown: F) -> DispatchStats
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!("dispatcher started");

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("dispatcher stopping");
                    break;
                }
                next = self.queue.pop() => match next {
                    Some(action) => self.dispatch(action).await,
                    None => {
                        info!("action queue closed; dispatcher stopping");
                        break;
                    }
                }
            }
        }

        self.stats
    }

    async fn dispatch(&mut self, action: Action) {
        self.stats.actions += 1;
        let code = action.code();
        let results = match action {
            Action::Resync { next, target, data } => match self.registry.get(target).await {
                Some(subscriber) => {
                    let reply = Outbound::sync(next, subscriber.identity(), data);
                    vec![subscriber.deliver(Arc::new(reply))]
                }
                None => vec![Err(DeliveryFailure::UnknownSubscriber(target))],
            },
            broadcast => match Outbound::broadcast(&broadcast) {
                Some(message) => self.broadcast(Arc::new(message)).await,
                None => Vec::new(),
            },
        };

        for result in results {
            match result {
                Ok(()) => self.stats.deliveries += 1,
                Err(error) => {
                    self.stats.failures += 1;
                    warn!(action = %code, %error, "delivery failed; skipping subscriber");
                }
            }
        }
    }

    async fn broadcast(&self, message: Arc<Outbound>) -> Vec<Result<(), DeliveryFailure>> {
        let members = self.registry.members().await;
        debug!(
            action = %message.code(),
            next = message.next(),
            subscribers = members.len(),
            "broadcasting"
        );
        members
            .iter()
            .map(|subscriber| subscriber.deliver(Arc::clone(&message)))
            .collect()
    }
}
