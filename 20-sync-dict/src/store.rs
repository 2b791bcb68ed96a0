//! Versioned key-value store, the single writer of the replication stream.
//!
//! Every mutation runs under one write lock that covers the map update, the
//! push onto the action queue, and the version bump. Either all three happen
//! or none does.

use std::{
    fmt,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    action::{Action, Snapshot},
    queue::ActionSender,
    registry::SubscriberId,
    version::{Version, VersionSpace},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
    /// The dispatcher is gone. The mutation was not applied.
    #[error("action queue is closed")]
    QueueClosed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreConfig {
    pub versions: VersionSpace,
}

struct State {
    version: Version,
    storage: Snapshot,
}

pub struct VersionedStore {
    state: RwLock<State>,
    queue: ActionSender,
    versions: VersionSpace,
}

impl VersionedStore {
    /// Creates a store at version 0 holding `initial`.
    pub fn new(initial: Snapshot, queue: ActionSender, config: StoreConfig) -> Self {
        Self {
            state: RwLock::new(State {
                version: 0,
                storage: initial,
            }),
            queue,
            versions: config.versions,
        }
    }

    /// Replaces the whole store. Returns the new version.
    pub fn load(&self, snapshot: Snapshot) -> Result<Version, StoreError> {
        let mut state = self.write();
        let current = state.version;
        let next = self.versions.next(current);
        self.push(Action::Load {
            current,
            next,
            data: snapshot.clone(),
        })?;
        state.storage = snapshot;
        state.version = next;
        Ok(next)
    }

    /// Inserts or overwrites `key`. Returns the new version.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Version, StoreError> {
        let (key, value) = (key.into(), value.into());
        let mut state = self.write();
        let current = state.version;
        let next = self.versions.next(current);
        self.push(Action::Set {
            current,
            next,
            key: key.clone(),
            value: value.clone(),
        })?;
        state.storage.insert(key, value);
        state.version = next;
        Ok(next)
    }

    /// Removes `key`. An absent key is an error and leaves the store untouched.
    pub fn delete(&self, key: &str) -> Result<Version, StoreError> {
        let mut state = self.write();
        if !state.storage.contains_key(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        let current = state.version;
        let next = self.versions.next(current);
        self.push(Action::Delete {
            current,
            next,
            key: key.to_string(),
        })?;
        state.storage.remove(key);
        state.version = next;
        Ok(next)
    }

    /// Queues a full-state replay for one subscriber. The version does not
    /// move; the returned value is the version the reply will carry.
    pub fn request_resync(&self, target: SubscriberId) -> Result<Version, StoreError> {
        // Exclusive even though nothing is written: a resync must not
        // interleave with a half-finished mutation on the queue.
        let state = self.write();
        self.push(Action::Resync {
            next: state.version,
            target,
            data: state.storage.clone(),
        })?;
        debug!(%target, version = state.version, "resync queued");
        Ok(state.version)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().storage.get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.read().storage.contains_key(key)
    }

    pub fn version(&self) -> Version {
        self.read().version
    }

    /// Copy of the current contents.
    pub fn entries(&self) -> Snapshot {
        self.read().storage.clone()
    }

    /// JSON text of the current contents, for diagnostics.
    pub fn snapshot(&self) -> String {
        let state = self.read();
        Value::Object(state.storage.clone().into_iter().collect()).to_string()
    }

    fn push(&self, action: Action) -> Result<(), StoreError> {
        self.queue.push(action).map_err(|_| StoreError::QueueClosed)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Display for VersionedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ver:{} -- {}", self.version(), self.snapshot())
    }
}

impl fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedStore")
            .field("version", &self.version())
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use serde_json::json;

    use super::*;
    use crate::queue::{ActionReceiver, action_queue};

    fn initial() -> Snapshot {
        let mut data = Snapshot::new();
        data.insert("b".into(), json!(999));
        data.insert("c".into(), json!(1));
        data
    }

    fn store_with(initial: Snapshot, config: StoreConfig) -> (VersionedStore, ActionReceiver) {
        let (tx, rx) = action_queue();
        (VersionedStore::new(initial, tx, config), rx)
    }

    #[test]
    fn set_queues_action_and_advances_version() {
        let (store, mut rx) = store_with(initial(), StoreConfig::default());
        assert_eq!(store.set("a", 5).expect("set"), 1);

        assert_eq!(
            rx.try_pop(),
            Some(Action::Set {
                current: 0,
                next: 1,
                key: "a".into(),
                value: json!(5),
            })
        );
        assert_eq!(store.version(), 1);
        assert_eq!(store.snapshot(), r#"{"a":5,"b":999,"c":1}"#);
    }

    #[test]
    fn load_replaces_contents() {
        let (store, mut rx) = store_with(initial(), StoreConfig::default());
        store.set("a", 5).expect("set");
        let mut replacement = Snapshot::new();
        replacement.insert("x".into(), json!(1));

        assert_eq!(store.load(replacement.clone()).expect("load"), 2);
        assert_eq!(store.entries(), replacement);

        let _ = rx.try_pop();
        assert_eq!(
            rx.try_pop(),
            Some(Action::Load {
                current: 1,
                next: 2,
                data: replacement,
            })
        );
    }

    #[test]
    fn delete_of_absent_key_changes_nothing() {
        let (store, mut rx) = store_with(initial(), StoreConfig::default());
        assert_eq!(
            store.delete("missing"),
            Err(StoreError::KeyNotFound("missing".into()))
        );
        assert_eq!(store.version(), 0);
        assert_eq!(store.entries(), initial());
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn delete_removes_key() {
        let (store, mut rx) = store_with(initial(), StoreConfig::default());
        assert_eq!(store.delete("b").expect("delete"), 1);
        assert!(!store.has("b"));
        assert_eq!(store.get("b"), None);
        assert_eq!(
            rx.try_pop(),
            Some(Action::Delete {
                current: 0,
                next: 1,
                key: "b".into(),
            })
        );
    }

    #[test]
    fn resync_keeps_version_and_copies_storage() {
        let (store, mut rx) = store_with(initial(), StoreConfig::default());
        store.set("a", 1).expect("set");
        let _ = rx.try_pop();

        let target = SubscriberId::from(3);
        assert_eq!(store.request_resync(target).expect("resync"), 1);
        assert_eq!(store.version(), 1);
        match rx.try_pop() {
            Some(Action::Resync {
                next,
                target: got,
                data,
            }) => {
                assert_eq!(next, 1);
                assert_eq!(got, target);
                assert_eq!(data, store.entries());
            }
            other => panic!("expected resync, got {other:?}"),
        }
    }

    #[test]
    fn queued_payload_is_isolated_from_later_writes() {
        let (store, mut rx) = store_with(Snapshot::new(), StoreConfig::default());
        store.set("k", json!({"n": 1})).expect("set");
        store.request_resync(SubscriberId::from(1)).expect("resync");
        store.set("k", json!({"n": 2})).expect("set");

        let _ = rx.try_pop();
        match rx.try_pop() {
            Some(Action::Resync { data, .. }) => assert_eq!(data["k"], json!({"n": 1})),
            other => panic!("expected resync, got {other:?}"),
        }
    }

    #[test]
    fn version_counts_mutations_modulo_space() {
        let config = StoreConfig {
            versions: VersionSpace::new(5).expect("valid modulus"),
        };
        let (store, _rx) = store_with(Snapshot::new(), config);
        for i in 0..12u64 {
            store.set("k", i).expect("set");
        }
        assert_eq!(store.version(), config.versions.wrap(12));
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn wraps_after_u16_max() {
        let (store, mut rx) = store_with(Snapshot::new(), StoreConfig::default());
        for i in 0..65_535u32 {
            store.set("k", i).expect("set");
        }
        assert_eq!(store.version(), 65_535);
        while rx.try_pop().is_some() {}

        assert_eq!(store.set("k", "wrapped").expect("set"), 0);
        assert_eq!(
            rx.try_pop(),
            Some(Action::Set {
                current: 65_535,
                next: 0,
                key: "k".into(),
                value: json!("wrapped"),
            })
        );
    }

    #[test]
    fn closed_queue_rejects_mutation_without_applying_it() {
        let (store, rx) = store_with(initial(), StoreConfig::default());
        drop(rx);
        assert_eq!(store.set("a", 1), Err(StoreError::QueueClosed));
        assert!(!store.has("a"));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn display_shows_version_and_contents() {
        let (store, _rx) = store_with(initial(), StoreConfig::default());
        assert_eq!(store.to_string(), r#"ver:0 -- {"b":999,"c":1}"#);
    }

    #[test]
    fn concurrent_writers_keep_the_version_chain_unbroken() {
        const WRITERS: u64 = 8;
        const SETS_PER_WRITER: u64 = 2_000;

        let (tx, mut rx) = action_queue();
        let store = Arc::new(VersionedStore::new(Snapshot::new(), tx, StoreConfig::default()));

        thread::scope(|scope| {
            for writer in 0..WRITERS {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..SETS_PER_WRITER {
                        store.set(format!("w{writer}"), i).expect("set");
                        if i % 100 == 0 {
                            store.request_resync(SubscriberId::from(writer)).expect("resync");
                        }
                    }
                });
            }
        });

        let mut expected: Version = 0;
        let mut sets = 0u64;
        let mut resyncs = 0u64;
        while let Some(action) = rx.try_pop() {
            match action {
                Action::Set { current, next, .. } => {
                    assert_eq!(current, expected, "set #{sets} broke the chain");
                    expected = next;
                    sets += 1;
                }
                Action::Resync { next, .. } => {
                    assert_eq!(next, expected, "resync carried a stale version");
                    resyncs += 1;
                }
                other => panic!("unexpected action: {other:?}"),
            }
        }

        let total = WRITERS * SETS_PER_WRITER;
        assert_eq!(sets, total);
        assert_eq!(resyncs, WRITERS * SETS_PER_WRITER / 100);
        assert_eq!(store.version(), expected);
        assert_eq!(store.version(), VersionSpace::default().wrap(total));
    }
}
