//! Newline-delimited JSON over a byte stream.

use std::{future::Future, io, net::SocketAddr};

use anyhow::Result;
use serde::Serialize;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use super::{ControlSource, LinkError, MessageSink};
use crate::{action::Outbound, connection::ConnectionHandler};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub struct LineSink<W> {
    writer: W,
}

impl<W> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W> MessageSink for LineSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send_message(&mut self, message: &Outbound) -> Result<(), LinkError> {
        write_message(&mut self.writer, message).await
    }
}

pub struct LineSource<R> {
    reader: R,
    line: String,
}

impl<R> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

impl<R> ControlSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn recv_text(&mut self) -> Result<Option<String>, LinkError> {
        loop {
            self.line.clear();
            let bytes = self.reader.read_line(&mut self.line).await?;
            if bytes == 0 {
                return Ok(None);
            }

            let trimmed = self.line.trim_end_matches(LINE_ENDINGS);
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }
}

/// Encodes `message` as one JSON line and flushes it.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Splits a TCP stream into the two halves a subscriber needs.
pub fn split_tcp(
    stream: TcpStream,
) -> (LineSink<OwnedWriteHalf>, LineSource<BufReader<OwnedReadHalf>>) {
    let (reader, writer) = stream.into_split();
    (LineSink::new(writer), LineSource::new(BufReader::new(reader)))
}

/// Accepts TCP subscribers until `shutdown` resolves.
pub async fn serve_until<F>(
    listener: TcpListener,
    connections: ConnectionHandler,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);

    loop {
        select! {
            _ = &mut shutdown => {
                info!("tcp listener shutting down");
                break;
            }
            accepted = listener.accept() => handle_accept_result(accepted, &connections),
        }
    }

    Ok(())
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    connections: &ConnectionHandler,
) {
    match result {
        Ok((stream, peer)) => {
            let connections = connections.clone();
            tokio::spawn(async move {
                let (sink, source) = split_tcp(stream);
                connections.run(peer.to_string(), sink, source).await;
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}
