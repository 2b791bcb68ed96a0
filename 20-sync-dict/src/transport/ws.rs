use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::{ControlSource, LinkError, MessageSink};
use crate::{action::Outbound, connection::ConnectionHandler};

pub const PATH: &str = "/ws";

impl MessageSink for SplitSink<WebSocket, Message> {
    async fn send_message(&mut self, message: &Outbound) -> Result<(), LinkError> {
        let text = serde_json::to_string(message)?;
        self.send(Message::Text(text)).await?;
        Ok(())
    }
}

impl ControlSource for SplitStream<WebSocket> {
    async fn recv_text(&mut self) -> Result<Option<String>, LinkError> {
        while let Some(frame) = self.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Close(_) => return Ok(None),
                Message::Binary(_) => {
                    return Err(LinkError::Protocol("binary frames are not accepted".into()));
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok(None)
    }
}

pub fn router(connections: ConnectionHandler) -> Router {
    Router::new()
        .route(PATH, get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(connections)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(connections): State<ConnectionHandler>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, source) = socket.split();
        connections.run(peer.to_string(), sink, source).await;
    })
}

/// Serves WebSocket subscribers until `shutdown` resolves.
pub async fn serve_until<F>(
    listener: TcpListener,
    connections: ConnectionHandler,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(connections).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
