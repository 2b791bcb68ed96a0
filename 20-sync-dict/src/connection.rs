//! Per-subscriber lifecycle.
//!
//! A connection is registered on arrival, then split in two: a writer task
//! drains the subscriber's outbox into the transport while the handler waits
//! for control messages. Any read failure, protocol violation, or close ends
//! the connection for good and removes it from the registry. A reconnect is a
//! brand-new subscriber.

use std::{fmt, io, sync::Arc};

use tokio::{select, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    registry::{Outbox, SubscriberId, SubscriberRegistry},
    store::VersionedStore,
    transport::{ControlSource, LinkError, MessageSink},
};

/// Inbound messages a subscriber may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Resend the full state to me.
    Sync,
}

impl ControlMessage {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "sync" => Some(ControlMessage::Sync),
            _ => None,
        }
    }
}

/// Why a connection ended.
#[derive(Debug)]
pub enum Disconnect {
    /// The subscriber closed the connection.
    Closed,
    /// Reading from the subscriber failed.
    ReadFailed(LinkError),
    /// Writing to the subscriber failed.
    WriteFailed(LinkError),
    /// The store can no longer queue actions.
    StoreClosed,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Closed => f.write_str("closed by peer"),
            Disconnect::ReadFailed(err) => write!(f, "read failed: {err}"),
            Disconnect::WriteFailed(err) => write!(f, "write failed: {err}"),
            Disconnect::StoreClosed => f.write_str("store closed"),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionHandler {
    store: Arc<VersionedStore>,
    registry: Arc<SubscriberRegistry>,
}

impl ConnectionHandler {
    pub fn new(store: Arc<VersionedStore>, registry: Arc<SubscriberRegistry>) -> Self {
        Self { store, registry }
    }

    /// Runs one subscriber from registration to removal.
    pub async fn run<S, R>(&self, identity: String, sink: S, mut source: R) -> Disconnect
    where
        S: MessageSink,
        R: ControlSource,
    {
        let (id, outbox) = self.registry.register(identity.clone()).await;
        info!(peer = %identity, subscriber = %id, "subscriber connected");

        let mut writer = spawn_writer(outbox, sink);
        let reason = loop {
            select! {
                inbound = source.recv_text() => match inbound {
                    Ok(Some(text)) => {
                        if let Err(reason) = self.handle_text(id, &identity, &text) {
                            break reason;
                        }
                    }
                    Ok(None) => break Disconnect::Closed,
                    Err(err) => break Disconnect::ReadFailed(err),
                },
                written = &mut writer => match written {
                    Ok(Err(err)) => break Disconnect::WriteFailed(err),
                    Ok(Ok(())) => break Disconnect::Closed,
                    Err(join) => {
                        let err = io::Error::other(join);
                        break Disconnect::WriteFailed(LinkError::Io(err));
                    }
                },
            }
        };

        self.registry.deregister(id).await;
        writer.abort();
        info!(peer = %identity, subscriber = %id, %reason, "subscriber disconnected");
        reason
    }

    fn handle_text(&self, id: SubscriberId, identity: &str, text: &str) -> Result<(), Disconnect> {
        match ControlMessage::parse(text) {
            Some(ControlMessage::Sync) => {
                debug!(peer = %identity, "resync requested");
                self.store.request_resync(id).map(|_| ()).map_err(|err| {
                    warn!(peer = %identity, error = %err, "failed to queue resync");
                    Disconnect::StoreClosed
                })
            }
            None => {
                debug!(peer = %identity, text, "ignoring unknown control message");
                Ok(())
            }
        }
    }
}

fn spawn_writer<S: MessageSink>(
    mut outbox: Outbox,
    mut sink: S,
) -> JoinHandle<Result<(), LinkError>> {
    tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            sink.send_message(&message).await?;
        }
        Ok(())
    })
}
