//! Live set of connected subscribers.
//!
//! The connection layer registers and deregisters; the dispatcher only reads.
//! Each subscriber gets an unbounded outbox drained by its own writer task,
//! so handing a message to a subscriber never waits on its transport.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};

use crate::action::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl From<u64> for SubscriberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("subscriber {0} is not registered")]
    UnknownSubscriber(SubscriberId),
    #[error("subscriber {id} ({identity}) is closed")]
    Closed { id: SubscriberId, identity: String },
}

/// Messages waiting to be written to one subscriber's transport.
pub type Outbox = mpsc::UnboundedReceiver<Arc<Outbound>>;

#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    identity: String,
    outbox: mpsc::UnboundedSender<Arc<Outbound>>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Connection identity, e.g. the peer's `host:port`.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn deliver(&self, message: Arc<Outbound>) -> Result<(), DeliveryFailure> {
        self.outbox.send(message).map_err(|_| DeliveryFailure::Closed {
            id: self.id,
            identity: self.identity.clone(),
        })
    }
}

#[derive(Debug)]
pub struct SubscriberRegistry {
    subscribers: RwLock<BTreeMap<SubscriberId, SubscriberHandle>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a subscriber and returns the outbox its writer should drain.
    pub async fn register(&self, identity: impl Into<String>) -> (SubscriberId, Outbox) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbox, rx) = mpsc::unbounded_channel();
        let handle = SubscriberHandle {
            id,
            identity: identity.into(),
            outbox,
        };
        self.subscribers.write().await.insert(id, handle);
        (id, rx)
    }

    /// Removes a subscriber, dropping its outbox sender. Returns the identity
    /// it was registered under.
    pub async fn deregister(&self, id: SubscriberId) -> Option<String> {
        self.subscribers
            .write()
            .await
            .remove(&id)
            .map(|handle| handle.identity)
    }

    pub async fn get(&self, id: SubscriberId) -> Option<SubscriberHandle> {
        self.subscribers.read().await.get(&id).cloned()
    }

    /// Copy of the current members in registration order. The lock is not
    /// held while the caller iterates.
    pub async fn members(&self) -> Vec<SubscriberHandle> {
        self.subscribers.read().await.values().cloned().collect()
    }

    pub async fn identities(&self) -> Vec<String> {
        self.subscribers
            .read()
            .await
            .values()
            .map(|handle| handle.identity.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Snapshot;

    #[tokio::test]
    async fn members_follow_registration_order() {
        let registry = SubscriberRegistry::new();
        let (first, _rx_a) = registry.register("10.0.0.1:1").await;
        let (second, _rx_b) = registry.register("10.0.0.2:2").await;

        let ids: Vec<_> = registry.members().await.iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(
            registry.identities().await,
            vec!["10.0.0.1:1".to_string(), "10.0.0.2:2".to_string()]
        );
    }

    #[tokio::test]
    async fn deregister_closes_the_outbox() {
        let registry = SubscriberRegistry::new();
        let (id, mut outbox) = registry.register("peer:1").await;

        assert_eq!(registry.deregister(id).await.as_deref(), Some("peer:1"));
        assert!(registry.is_empty().await);
        assert!(registry.get(id).await.is_none());
        assert!(outbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn deliver_fails_once_writer_is_gone() {
        let registry = SubscriberRegistry::new();
        let (id, outbox) = registry.register("peer:1").await;
        let handle = registry.get(id).await.expect("registered");
        drop(outbox);

        let message = Arc::new(Outbound::sync(0, "peer:1", Snapshot::new()));
        assert_eq!(
            handle.deliver(message),
            Err(DeliveryFailure::Closed {
                id,
                identity: "peer:1".into()
            })
        );
    }
}
