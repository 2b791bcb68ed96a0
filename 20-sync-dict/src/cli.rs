use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{action::Snapshot, version::VersionSpace};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the store to subscribers.
    Serve(ServeArgs),
    /// Connect to a TCP server and mirror its store on stdout.
    Watch(WatchArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// WebSocket at `/ws`, one JSON object per text frame.
    Ws,
    /// Raw TCP, one JSON object per line.
    Tcp,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:9999")]
    pub listen: SocketAddr,

    #[arg(long, value_enum, default_value_t = Transport::Ws)]
    pub transport: Transport,

    /// Initial contents of the store, as a JSON object.
    #[arg(long, default_value = r#"{"b":999,"c":1}"#, value_parser = parse_snapshot)]
    pub initial: Snapshot,

    /// Versions wrap around this modulus.
    #[arg(long = "modulus", default_value = "65536", value_parser = parse_versions)]
    pub versions: VersionSpace,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Address of a server started with `--transport tcp`.
    #[arg(long, default_value = "127.0.0.1:9999")]
    pub server: SocketAddr,
}

fn parse_snapshot(raw: &str) -> Result<Snapshot, String> {
    serde_json::from_str(raw).map_err(|err| format!("expected a JSON object: {err}"))
}

fn parse_versions(raw: &str) -> Result<VersionSpace, String> {
    let modulus: u32 = raw.parse().map_err(|err| format!("{err}"))?;
    VersionSpace::new(modulus).map_err(|err| err.to_string())
}
