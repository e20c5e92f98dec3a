//! Single-threaded readiness loop and command dispatcher.
//!
//! One task owns the listener and the [`ConnectionTable`]. Each iteration waits
//! until the listener or any tracked socket is readable, then either accepts one
//! connection or reads and executes one command. Handlers are awaited inline,
//! so a long Get/Put holds up every other client until it finishes.

use anyhow::{Context, Result};
use std::future::{poll_fn, Future};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::command::{Command, ParsedCommand};
use crate::config::ServerConfig;
use crate::frame::{is_peer_closed, send_framed};
use crate::handlers::{self, HandlerContext};
use crate::logger::Logger;
use crate::protocol::{reply, COMMAND_BUFFER};
use crate::table::{ConnectionId, ConnectionState, ConnectionTable};

enum Event {
    Accept(io::Result<(TcpStream, SocketAddr)>),
    Readable(ConnectionId, io::Result<()>),
    Shutdown,
}

enum Flow {
    Continue,
    Close,
}

pub struct Server {
    listener: TcpListener,
    table: ConnectionTable<TcpStream>,
    ctx: HandlerContext,
    // Last connection serviced; the next scan starts after it
    cursor: Option<ConnectionId>,
}

impl Server {
    pub async fn bind(config: &ServerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        let root = std::fs::canonicalize(&config.root)
            .with_context(|| format!("Failed to canonicalize root path: {}", config.root.display()))?;
        let bind = config.bind_addr();
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        Ok(Self {
            listener,
            table: ConnectionTable::new(config.max_clients),
            ctx: HandlerContext::new(root, config.max_chunk, config.upload_idle, logger),
            cursor: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn root(&self) -> &Path {
        &self.ctx.root
    }

    /// Serve until the process is killed.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drop every connection.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);
        self.ctx.logger.listening(self.local_addr()?, &self.ctx.root);

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => Event::Shutdown,
                accepted = self.listener.accept() => Event::Accept(accepted),
                (id, ready) = next_readable(&self.table, self.cursor) => Event::Readable(id, ready),
            };
            match event {
                Event::Shutdown => break,
                Event::Accept(Ok((stream, peer))) => self.admit(stream, peer).await,
                Event::Accept(Err(e)) => {
                    self.ctx.logger.error("accept", &e.to_string());
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Event::Readable(id, Ok(())) => {
                    self.cursor = Some(id);
                    self.service(id).await;
                }
                Event::Readable(id, Err(e)) => self.close(id, &format!("socket error: {}", e)),
            }
        }

        let ids: Vec<ConnectionId> = self.table.iter().map(|c| c.id).collect();
        for id in ids {
            self.close(id, "server shutdown");
        }
        Ok(())
    }

    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        match self.table.insert(stream, peer) {
            Ok(id) => self.ctx.logger.accepted(id, peer),
            Err(full) => {
                // Accept-then-reject: tell the peer why, then close
                self.ctx.logger.rejected(full.peer, full.capacity);
                let mut stream = full.stream;
                let msg = reply::server_full(full.capacity);
                let _ = timeout(
                    Duration::from_secs(1),
                    send_framed(&mut stream, msg.as_bytes(), self.ctx.max_chunk),
                )
                .await;
                let _ = stream.shutdown().await;
            }
        }
    }

    async fn service(&mut self, id: ConnectionId) {
        let mut buf = [0u8; COMMAND_BUFFER];
        let Some(conn) = self.table.get_mut(id) else {
            return;
        };
        let n = match conn.stream.try_read(&mut buf) {
            Ok(0) => return self.close(id, "peer closed"),
            Ok(n) => n,
            // Spurious readiness
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => return self.close(id, &format!("read error: {}", e)),
        };
        conn.state = ConnectionState::Active;
        let peer = conn.peer;
        if Command::is_blank(&buf[..n]) {
            return;
        }

        let parsed = Command::parse(&buf[..n]);
        self.ctx.logger.command(id, peer, &parsed.command.to_string());
        let verb = parsed.command.verb();
        match self.dispatch(id, parsed).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => self.close(id, "quit"),
            Err(e) if is_peer_closed(&e) => self.close(id, &format!("peer closed during {}", verb)),
            Err(e) => {
                self.ctx.logger.error(verb, &format!("{:#}", e));
                self.close(id, &format!("{} failed", verb));
            }
        }
    }

    async fn dispatch(&mut self, id: ConnectionId, parsed: ParsedCommand) -> Result<Flow> {
        if let Command::Quit = parsed.command {
            return Ok(Flow::Close);
        }
        let listing = match parsed.command {
            Command::List => Some(handlers::render_peer_list(&self.table.peers())),
            _ => None,
        };

        let ctx = &self.ctx;
        let Some(conn) = self.table.get_mut(id) else {
            return Ok(Flow::Close);
        };
        let stream = &mut conn.stream;

        match parsed.command {
            Command::List => {
                let body = listing.unwrap_or_default();
                send_framed(stream, body.as_bytes(), ctx.max_chunk).await?;
            }
            Command::Files => handlers::list_files(stream, ctx).await?,
            Command::Get(name) => {
                handlers::send_file(stream, ctx, id, &name).await?;
            }
            Command::Put(name) => {
                let local_ip = stream.local_addr()?.ip();
                handlers::receive_upload(stream, ctx, id, &name, &parsed.trailing, local_ip).await?;
            }
            Command::Invalid(msg) => send_framed(stream, msg.as_bytes(), ctx.max_chunk).await?,
            Command::Quit => return Ok(Flow::Close),
        }
        Ok(Flow::Continue)
    }

    fn close(&mut self, id: ConnectionId, reason: &str) {
        // Dropping the stream releases the socket
        if let Some(conn) = self.table.remove(id) {
            self.ctx.logger.closed(conn.id, conn.peer, reason);
        }
    }
}

/// Resolve once any tracked socket is readable. The scan starts just after
/// `cursor` and wraps around, so one chatty client cannot starve the rest.
fn next_readable(
    table: &ConnectionTable<TcpStream>,
    cursor: Option<ConnectionId>,
) -> impl Future<Output = (ConnectionId, io::Result<()>)> + '_ {
    poll_fn(move |cx| {
        let after = table.iter().filter(|c| cursor.map_or(true, |cur| c.id > cur));
        let before = table.iter().filter(|c| cursor.map_or(false, |cur| c.id <= cur));
        for conn in after.chain(before) {
            if let Poll::Ready(res) = conn.stream.poll_read_ready(cx) {
                return Poll::Ready((conn.id, res));
            }
        }
        Poll::Pending
    })
}
