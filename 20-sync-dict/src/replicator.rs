use std::sync::Arc;

use tokio::{
    sync::oneshot,
    task::{JoinError, JoinHandle},
};

use crate::{
    action::Snapshot,
    connection::{ConnectionHandler, Disconnect},
    dispatcher::{DispatchStats, Dispatcher},
    queue::action_queue,
    registry::SubscriberRegistry,
    store::{StoreConfig, VersionedStore},
    transport::{ControlSource, MessageSink},
};

/// A running replication engine: one store, one dispatcher task, and the
/// subscribers currently attached.
///
/// Must be created inside a Tokio runtime; the dispatcher is spawned
/// immediately.
pub struct Replicator {
    store: Arc<VersionedStore>,
    registry: Arc<SubscriberRegistry>,
    stop: oneshot::Sender<()>,
    dispatcher: JoinHandle<DispatchStats>,
}

impl Replicator {
    pub fn new(initial: Snapshot, config: StoreConfig) -> Self {
        let (tx, rx) = action_queue();
        let store = Arc::new(VersionedStore::new(initial, tx, config));
        let registry = Arc::new(SubscriberRegistry::new());

        let (stop, stopped) = oneshot::channel::<()>();
        let dispatcher = Dispatcher::new(rx, Arc::clone(&registry));
        let dispatcher = tokio::spawn(dispatcher.run_until(async move {
            let _ = stopped.await;
        }));

        Self {
            store,
            registry,
            stop,
            dispatcher,
        }
    }

    pub fn store(&self) -> Arc<VersionedStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> Arc<SubscriberRegistry> {
        Arc::clone(&self.registry)
    }

    /// Handler that transports use to attach subscribers.
    pub fn connections(&self) -> ConnectionHandler {
        ConnectionHandler::new(self.store(), self.registry())
    }

    /// Runs one subscriber connection to completion.
    pub async fn handle_connection<S, R>(
        &self,
        identity: impl Into<String>,
        sink: S,
        source: R,
    ) -> Disconnect
    where
        S: MessageSink,
        R: ControlSource,
    {
        self.connections().run(identity.into(), sink, source).await
    }

    /// Stops the dispatcher and waits for it to finish.
    pub async fn shutdown(self) -> Result<DispatchStats, JoinError> {
        let _ = self.stop.send(());
        self.dispatcher.await
    }
}
