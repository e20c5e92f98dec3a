//! Ferry library
//!
//! Remote file access over a single TCP connection per client: a
//! single-threaded readiness loop on the server, commands sent as text lines,
//! and responses terminated by an EOT sentinel byte.

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod frame;
pub mod handlers;
pub mod logger;
pub mod paths;
pub mod protocol;
pub mod server;
pub mod table;
