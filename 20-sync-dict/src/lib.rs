//! Single-writer key-value store replicated to passive subscribers.
//!
//! One authoritative store is mutated locally and every change is streamed,
//! in order, to any number of connected observers. An observer that notices
//! a gap in the `current`/`next` version chain asks for a full resync, which
//! is answered to it alone without disturbing anyone else's stream.
//!
//! - [`store`] owns the map and the wrapping version counter; each mutation
//!   is paired with exactly one queued [`action::Action`].
//! - [`queue`] is the unbounded FIFO from the store to the dispatcher.
//! - [`dispatcher`] drains the queue, broadcasting mutations and unicasting
//!   resync replies.
//! - [`registry`] tracks connected subscribers and their outboxes.
//! - [`connection`] runs one subscriber's lifecycle and reads its control
//!   messages.
//! - [`transport`] adapts WebSocket and line-delimited TCP connections.
//! - [`replicator`] ties the pieces together for an embedding application.
//! - [`client`] mirrors a remote store, detecting gaps and resyncing.
//! - [`cli`] parses the command-line interface of the `sync-dict` binary.

pub mod action;
pub mod cli;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod replicator;
pub mod store;
pub mod transport;
pub mod version;

pub use action::{Action, ActionCode, Outbound, Snapshot};
pub use replicator::Replicator;
pub use store::{StoreConfig, StoreError, VersionedStore};
pub use version::{Version, VersionSpace};
