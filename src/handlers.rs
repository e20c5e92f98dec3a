//! Command handlers. Each one writes exactly one framed response (or, for an
//! upload cut short by the peer, none) to the requesting stream.

use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::frame::{send_framed, FrameWriter, PeerClosed};
use crate::logger::Logger;
use crate::paths::resolve_under_root;
use crate::protocol::{reply, TIMESTAMP_FORMAT, UPLOAD_BUFFER};
use crate::table::ConnectionId;

/// Hostname and address reported in Put acknowledgements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub hostname: String,
    pub address: IpAddr,
}

/// State shared by every handler invocation
pub struct HandlerContext {
    pub root: PathBuf,
    pub max_chunk: usize,
    pub upload_idle: Duration,
    pub identity: OnceCell<ServerIdentity>,
    pub logger: Arc<dyn Logger>,
}

impl HandlerContext {
    pub fn new(root: PathBuf, max_chunk: usize, upload_idle: Duration, logger: Arc<dyn Logger>) -> Self {
        Self {
            root,
            max_chunk,
            upload_idle,
            identity: OnceCell::new(),
            logger,
        }
    }

    /// Resolved once, then reused for the life of the process
    pub async fn identity(&self, fallback: IpAddr) -> &ServerIdentity {
        self.identity
            .get_or_init(|| resolve_identity(fallback))
            .await
    }
}

pub async fn resolve_identity(fallback: IpAddr) -> ServerIdentity {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let address = match tokio::net::lookup_host((hostname.as_str(), 0)).await {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .map(|a| a.ip())
                .unwrap_or(fallback)
        }
        Err(_) => fallback,
    };
    ServerIdentity { hostname, address }
}

pub fn format_time(t: SystemTime) -> String {
    DateTime::<Local>::from(t).format(TIMESTAMP_FORMAT).to_string()
}

pub fn render_peer_list(peers: &[(ConnectionId, SocketAddr)]) -> String {
    let mut out = String::from(reply::LIST_HEADER);
    for (_, peer) in peers {
        out.push_str(&format!("{}:{}\n", peer.ip(), peer.port()));
    }
    out.push_str(&reply::total_clients(peers.len()));
    out
}

/// One line per regular file or directory in `root`, sorted by name.
pub async fn render_file_list(root: &Path) -> Result<String> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(root).await?;
    while let Some(entry) = dir.next_entry().await? {
        // Follows symlinks, like stat(2)
        let meta = match tokio::fs::metadata(entry.path()).await {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !(meta.is_file() || meta.is_dir()) {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((entry.file_name().to_string_lossy().into_owned(), modified));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::from(reply::FILES_HEADER);
    for (name, modified) in &entries {
        out.push_str(&format!("{}\t{}\n", name, format_time(*modified)));
    }
    out.push_str(&reply::total_files(entries.len()));
    Ok(out)
}

pub async fn list_files<S>(stream: &mut S, ctx: &HandlerContext) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let body = match render_file_list(&ctx.root).await {
        Ok(body) => body,
        Err(e) => {
            ctx.logger.error("files", &e.to_string());
            format!("Error: cannot list files: {}\n", e)
        }
    };
    send_framed(stream, body.as_bytes(), ctx.max_chunk).await
}

/// Serve `Get name`. Returns the number of content bytes sent, or None when an
/// error response was sent instead.
pub async fn send_file<S>(
    stream: &mut S,
    ctx: &HandlerContext,
    id: ConnectionId,
    name: &str,
) -> Result<Option<u64>>
where
    S: AsyncWrite + Unpin,
{
    let path = match resolve_under_root(&ctx.root, name) {
        Ok(p) => p,
        Err(_) => {
            send_framed(stream, reply::invalid_filename(name).as_bytes(), ctx.max_chunk).await?;
            return Ok(None);
        }
    };

    let opened = async {
        let file = File::open(&path).await?;
        let meta = file.metadata().await?;
        Ok::<_, std::io::Error>((file, meta))
    }
    .await;
    let (mut file, meta) = match opened {
        Ok((_, meta)) if !meta.is_file() => {
            let msg = format!("Error: cannot read {}: not a regular file\n", name);
            send_framed(stream, msg.as_bytes(), ctx.max_chunk).await?;
            return Ok(None);
        }
        Ok(pair) => pair,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            send_framed(stream, reply::file_not_found(name).as_bytes(), ctx.max_chunk).await?;
            return Ok(None);
        }
        Err(e) => {
            let msg = format!("Error: cannot read {}: {}\n", name, e);
            send_framed(stream, msg.as_bytes(), ctx.max_chunk).await?;
            return Ok(None);
        }
    };

    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let header = format!(
        "Filename: {}\nLast Modified: {}\nSize: {} bytes\n\n",
        name,
        format_time(modified),
        meta.len()
    );

    let mut fw = FrameWriter::new(stream, ctx.max_chunk);
    fw.write_chunked(header.as_bytes()).await?;
    let mut buf = vec![0u8; ctx.max_chunk];
    let mut sent = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        fw.write_chunked(&buf[..n]).await?;
        sent += n as u64;
    }
    fw.finish().await?;
    ctx.logger.transfer(id, "get", &path, sent);
    Ok(Some(sent))
}

/// Serve `Put name`: append whatever arrives until the stream has been idle for
/// `ctx.upload_idle`, then acknowledge. `head` holds upload bytes that arrived
/// in the same read as the command.
///
/// A still-sending client slower than the idle window is truncated. If the
/// peer closes mid-upload the partial file is kept and [`PeerClosed`] is
/// returned without a response.
pub async fn receive_upload<S>(
    stream: &mut S,
    ctx: &HandlerContext,
    id: ConnectionId,
    name: &str,
    head: &[u8],
    local_ip: IpAddr,
) -> Result<Option<u64>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = resolve_under_root(&ctx.root, name);
    let mut file = match &target {
        Ok(path) => match File::create(path).await {
            Ok(f) => Some(f),
            Err(e) => {
                ctx.logger.error("put", &format!("{}: {}", path.display(), e));
                None
            }
        },
        Err(_) => None,
    };
    let open_error = match (&target, &file) {
        (Err(_), _) => Some(reply::invalid_filename(name)),
        (Ok(_), None) => Some(format!("Error: cannot create {}\n", name)),
        _ => None,
    };

    let mut received = 0u64;
    if let Some(f) = file.as_mut() {
        f.write_all(head).await?;
    }
    received += head.len() as u64;

    let mut buf = vec![0u8; UPLOAD_BUFFER];
    let mut peer_closed = false;
    loop {
        match timeout(ctx.upload_idle, stream.read(&mut buf)).await {
            // Idle window elapsed: upload complete
            Err(_) => break,
            Ok(Ok(0)) => {
                peer_closed = true;
                break;
            }
            Ok(Ok(n)) => {
                if let Some(f) = file.as_mut() {
                    f.write_all(&buf[..n]).await?;
                }
                received += n as u64;
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    if let Some(f) = file.as_mut() {
        f.flush().await?;
        f.sync_all().await.ok();
    }
    if let (Ok(path), Some(_)) = (&target, &file) {
        ctx.logger.transfer(id, "put", path, received);
    }
    if peer_closed {
        bail!(PeerClosed);
    }

    if let Some(msg) = open_error {
        send_framed(stream, msg.as_bytes(), ctx.max_chunk).await?;
        return Ok(None);
    }
    let identity = ctx.identity(local_ip).await;
    let ack = format!(
        "{}{}\n{}\n{}\n",
        reply::OK_PREFIX,
        identity.hostname,
        identity.address,
        Local::now().format(TIMESTAMP_FORMAT)
    );
    send_framed(stream, ack.as_bytes(), ctx.max_chunk).await?;
    Ok(Some(received))
}
