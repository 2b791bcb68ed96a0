//! Subscriber transports.
//!
//! The core only needs two things from a connection: a way to push
//! structured messages out, and a way to wait for the next inbound text.
//! [`ws`] provides both over a WebSocket, [`line`] over any byte stream
//! using newline-delimited JSON.

use std::future::Future;

use thiserror::Error;

use crate::action::Outbound;

pub mod line;
pub mod ws;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket failed: {0}")]
    WebSocket(#[from] axum::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Outbound half of a subscriber connection.
pub trait MessageSink: Send + 'static {
    fn send_message(
        &mut self,
        message: &Outbound,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;
}

/// Inbound half of a subscriber connection.
pub trait ControlSource: Send + 'static {
    /// Next text message, or `None` once the peer has closed the connection.
    fn recv_text(&mut self) -> impl Future<Output = Result<Option<String>, LinkError>> + Send;
}
