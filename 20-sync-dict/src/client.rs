//! Subscriber side: keeps a local mirror of a remote store.
//!
//! The mirror applies broadcasts only while its version chain is unbroken.
//! On a gap it stops applying, asks for a resync, and ignores everything
//! until the resync reply arrives.

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{debug, info, warn};

use crate::{
    action::{Outbound, Snapshot},
    cli::WatchArgs,
    version::Version,
};

/// Control token that asks the server for a full resync.
pub const SYNC_REQUEST: &str = "sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// Connected, first resync not yet received.
    Init,
    /// In step with the server.
    Ready,
    /// A gap was detected; waiting for the resync reply.
    Waiting,
}

/// What the caller should do after feeding a message to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Applied,
    /// The chain broke; send [`SYNC_REQUEST`].
    NeedsSync,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct Mirror {
    state: MirrorState,
    version: Option<Version>,
    data: Snapshot,
}

impl Mirror {
    pub fn new() -> Self {
        Self {
            state: MirrorState::Init,
            version: None,
            data: Snapshot::new(),
        }
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn data(&self) -> &Snapshot {
        &self.data
    }

    pub fn apply(&mut self, message: Outbound) -> Step {
        if self.state != MirrorState::Ready {
            return match message {
                Outbound::Sync { next, data, .. } => {
                    self.version = Some(next);
                    self.data = data;
                    self.state = MirrorState::Ready;
                    Step::Applied
                }
                _ => Step::Ignored,
            };
        }

        match message.current() {
            Some(current) if Some(current) == self.version => {}
            // A resync nobody here asked for carries no chain; skip it.
            None => return Step::Ignored,
            Some(_) => {
                self.state = MirrorState::Waiting;
                return Step::NeedsSync;
            }
        }

        self.version = Some(message.next());
        match message {
            Outbound::Set { key, value, .. } => {
                self.data.insert(key, value);
            }
            Outbound::Delete { key, .. } => {
                self.data.remove(&key);
            }
            Outbound::Load { data, .. } => self.data = data,
            Outbound::Sync { .. } => {}
        }
        Step::Applied
    }
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirrors a TCP server's store, printing it after every applied change.
pub async fn run(args: WatchArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    request_sync(&mut writer).await?;

    let mut mirror = Mirror::new();
    run_watch_loop(&mut reader, &mut writer, &mut mirror).await?;

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown writer cleanly");
    }
    Ok(())
}

async fn run_watch_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    mirror: &mut Mirror,
) -> Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        select! {
            read = reader.read_line(&mut line) => {
                if read? == 0 {
                    println!("*** server closed the connection");
                    break;
                }
                let trimmed = line.trim_end();
                if trimmed.is_empty() {
                    continue;
                }
                let message: Outbound = serde_json::from_str(trimmed)
                    .with_context(|| format!("malformed message: {trimmed}"))?;
                match mirror.apply(message) {
                    Step::Applied => print_mirror(mirror)?,
                    Step::NeedsSync => {
                        debug!("version gap detected; requesting resync");
                        request_sync(writer).await?;
                    }
                    Step::Ignored => {}
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn request_sync(writer: &mut OwnedWriteHalf) -> Result<()> {
    writer.write_all(SYNC_REQUEST.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

fn print_mirror(mirror: &Mirror) -> Result<()> {
    let data = serde_json::to_string(mirror.data())?;
    let version = mirror
        .version()
        .map_or_else(|| "-".to_string(), |v| v.to_string());
    println!("ver:{version} -- {data}");
    Ok(())
}
