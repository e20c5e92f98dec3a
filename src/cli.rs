//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

/// Daemon options for ferryd
#[derive(Clone, Debug, Default, Parser)]
#[command(author, version, about = "Ferry daemon - serve a directory over the EOT-framed command protocol")]
pub struct DaemonOpts {
    /// Port to listen on (0 or omitted = OS-assigned)
    pub port: Option<u16>,

    /// Bind host
    #[arg(long)]
    pub bind: Option<String>,

    /// Root directory to serve
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Maximum simultaneously connected clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Largest single send of a response payload, in bytes
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Idle window that ends a Put upload, in milliseconds
    #[arg(long)]
    pub upload_idle_ms: Option<u64>,

    /// Append an event log to this file
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// TOML config file; flags given on the command line win
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Echo every command to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

/// Client options for the interactive ferry shell
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Ferry client - interactive shell for a ferryd server")]
pub struct ClientOpts {
    /// Server address
    pub address: String,

    /// Server port
    pub port: u16,
}
