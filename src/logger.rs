use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::Mutex;
use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use crate::table::ConnectionId;

pub trait Logger: Send + Sync {
    fn listening(&self, _addr: SocketAddr, _root: &Path) {}
    fn accepted(&self, _id: ConnectionId, _peer: SocketAddr) {}
    fn rejected(&self, _peer: SocketAddr, _capacity: usize) {}
    fn closed(&self, _id: ConnectionId, _peer: SocketAddr, _reason: &str) {}
    fn command(&self, _id: ConnectionId, _peer: SocketAddr, _line: &str) {}
    fn transfer(&self, _id: ConnectionId, _verb: &str, _path: &Path, _bytes: u64) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Operator console output
pub struct StderrLogger {
    verbose: bool,
}

impl StderrLogger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Logger for StderrLogger {
    fn listening(&self, addr: SocketAddr, root: &Path) {
        eprintln!("ferryd listening on {} root={}", addr, root.display());
    }
    fn accepted(&self, id: ConnectionId, peer: SocketAddr) {
        eprintln!("conn {} from {}", id, peer);
    }
    fn rejected(&self, peer: SocketAddr, capacity: usize) {
        eprintln!("rejecting {}: {} clients already connected", peer, capacity);
    }
    fn closed(&self, id: ConnectionId, peer: SocketAddr, reason: &str) {
        eprintln!("conn {} ({}) closed: {}", id, peer, reason);
    }
    fn command(&self, id: ConnectionId, peer: SocketAddr, line: &str) {
        if self.verbose {
            eprintln!("conn {} ({}) -> {}", id, peer, line);
        }
    }
    fn transfer(&self, id: ConnectionId, verb: &str, path: &Path, bytes: u64) {
        if self.verbose {
            eprintln!("conn {} {} {} ({} bytes)", id, verb, path.display(), bytes);
        }
    }
    fn error(&self, context: &str, msg: &str) {
        eprintln!("{}: {}", context, msg);
    }
}

/// Append-only event log: one `timestamp EVENT key=value ...` record per line.
pub struct TextLogger {
    out: Mutex<LineWriter<File>>,
}

impl TextLogger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        Ok(Self {
            out: Mutex::new(LineWriter::new(file)),
        })
    }

    fn record(&self, event: &str, fields: &[(&str, &dyn fmt::Display)]) {
        let mut rec = format!("{} {}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"), event);
        for (key, value) in fields {
            let value = value.to_string();
            // Values with spaces are quoted so every record splits on whitespace
            if value.is_empty() || value.contains(char::is_whitespace) {
                let _ = write!(rec, " {}={:?}", key, value);
            } else {
                let _ = write!(rec, " {}={}", key, value);
            }
        }
        rec.push('\n');
        let _ = self.out.lock().write_all(rec.as_bytes());
    }
}

impl Logger for TextLogger {
    fn listening(&self, addr: SocketAddr, root: &Path) {
        self.record("LISTEN", &[("addr", &addr), ("root", &root.display())]);
    }
    fn accepted(&self, id: ConnectionId, peer: SocketAddr) {
        self.record("ACCEPT", &[("conn", &id), ("peer", &peer)]);
    }
    fn rejected(&self, peer: SocketAddr, capacity: usize) {
        self.record("REJECT", &[("peer", &peer), ("capacity", &capacity)]);
    }
    fn closed(&self, id: ConnectionId, peer: SocketAddr, reason: &str) {
        self.record("CLOSE", &[("conn", &id), ("peer", &peer), ("reason", &reason)]);
    }
    fn command(&self, id: ConnectionId, peer: SocketAddr, line: &str) {
        self.record("CMD", &[("conn", &id), ("peer", &peer), ("line", &line)]);
    }
    fn transfer(&self, id: ConnectionId, verb: &str, path: &Path, bytes: u64) {
        let event = verb.to_ascii_uppercase();
        self.record(&event, &[("conn", &id), ("path", &path.display()), ("bytes", &bytes)]);
    }
    fn error(&self, context: &str, msg: &str) {
        self.record("ERROR", &[("ctx", &context), ("msg", &msg)]);
    }
}

/// Fans every event out to several loggers
pub struct TeeLogger {
    sinks: Vec<Arc<dyn Logger>>,
}

impl TeeLogger {
    pub fn new(sinks: Vec<Arc<dyn Logger>>) -> Self {
        Self { sinks }
    }
}

impl Logger for TeeLogger {
    fn listening(&self, addr: SocketAddr, root: &Path) {
        self.sinks.iter().for_each(|s| s.listening(addr, root));
    }
    fn accepted(&self, id: ConnectionId, peer: SocketAddr) {
        self.sinks.iter().for_each(|s| s.accepted(id, peer));
    }
    fn rejected(&self, peer: SocketAddr, capacity: usize) {
        self.sinks.iter().for_each(|s| s.rejected(peer, capacity));
    }
    fn closed(&self, id: ConnectionId, peer: SocketAddr, reason: &str) {
        self.sinks.iter().for_each(|s| s.closed(id, peer, reason));
    }
    fn command(&self, id: ConnectionId, peer: SocketAddr, line: &str) {
        self.sinks.iter().for_each(|s| s.command(id, peer, line));
    }
    fn transfer(&self, id: ConnectionId, verb: &str, path: &Path, bytes: u64) {
        self.sinks.iter().for_each(|s| s.transfer(id, verb, path, bytes));
    }
    fn error(&self, context: &str, msg: &str) {
        self.sinks.iter().for_each(|s| s.error(context, msg));
    }
}
