//! Client side of the protocol: send one command line, read one framed reply.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::command::Command;
use crate::frame::{is_peer_closed, FrameReader};
use crate::protocol::{timeouts, verb};

/// Result of a `Get`: either the file was saved, or the server sent a message
/// (e.g. "File not found") instead of file content.
#[derive(Debug, PartialEq, Eq)]
pub enum GetOutcome {
    Saved {
        path: PathBuf,
        bytes: u64,
        header: String,
    },
    Message(String),
}

/// Reading or writing a file on this side failed. The exchange with the server
/// was already complete, so the session can carry on.
#[derive(Debug)]
pub struct LocalFileError {
    pub path: PathBuf,
    source: std::io::Error,
}

impl fmt::Display for LocalFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for LocalFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

fn is_local_file_error(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.downcast_ref::<LocalFileError>().is_some())
}

pub struct Client {
    conn: FrameReader<TcpStream>,
}

impl Client {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = match timeout(
            Duration::from_millis(timeouts::CONNECT_MS),
            TcpStream::connect((host, port)),
        )
        .await
        {
            Ok(res) => res.with_context(|| format!("Connect {}:{}", host, port))?,
            Err(_) => bail!("Connect {}:{}: timed out", host, port),
        };
        let _ = stream.set_nodelay(true);
        Ok(Self {
            conn: FrameReader::new(stream),
        })
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self.conn.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Send `line` and return the reassembled reply.
    pub async fn request(&mut self, line: &str) -> Result<Vec<u8>> {
        self.send_line(line).await?;
        self.conn.read_frame().await
    }

    /// Fetch `name`. File content lands in `dest_dir/<basename of name>`; the
    /// metadata header is returned rather than written to the file.
    pub async fn get(&mut self, name: &str, dest_dir: &Path) -> Result<GetOutcome> {
        let payload = self.request(&format!("{} {}", verb::GET, name)).await?;
        let split = payload.windows(2).position(|w| w == b"\n\n");
        let (header, body) = match split {
            Some(pos) if payload.starts_with(b"Filename: ") => (&payload[..pos], &payload[pos + 2..]),
            _ => return Ok(GetOutcome::Message(String::from_utf8_lossy(&payload).into_owned())),
        };
        let base = Path::new(name)
            .file_name()
            .with_context(|| format!("no file name in {:?}", name))?;
        let path = dest_dir.join(base);
        if let Err(source) = tokio::fs::write(&path, body).await {
            return Err(LocalFileError { path, source }.into());
        }
        Ok(GetOutcome::Saved {
            path,
            bytes: body.len() as u64,
            header: String::from_utf8_lossy(header).into_owned(),
        })
    }

    /// Upload `local` as `name`. The command line and the file bytes go out back
    /// to back; the server treats the upload as finished after its idle window.
    pub async fn put(&mut self, name: &str, local: &Path) -> Result<Vec<u8>> {
        let data = tokio::fs::read(local).await.map_err(|source| LocalFileError {
            path: local.to_path_buf(),
            source,
        })?;
        let stream = self.conn.get_mut();
        stream
            .write_all(format!("{} {}\n", verb::PUT, name).as_bytes())
            .await?;
        stream.write_all(&data).await?;
        stream.flush().await?;
        self.conn.read_frame().await
    }

    /// Send `Quit`; the server closes without replying.
    pub async fn quit(mut self) -> Result<()> {
        self.send_line(verb::QUIT).await?;
        let _ = self.conn.get_mut().shutdown().await;
        Ok(())
    }
}

/// Interactive loop: one command per input line, replies printed to stdout.
/// Get saves into `workdir`; Put uploads from `workdir` when the file exists there.
pub async fn run_shell<R>(mut client: Client, input: R, workdir: &Path) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        print_prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match run_one(&mut client, line, workdir).await {
            Ok(true) => continue,
            Ok(false) => return client.quit().await,
            Err(e) if is_peer_closed(&e) => {
                println!("Server closed the connection");
                return Ok(());
            }
            Err(e) if is_local_file_error(&e) => eprintln!("Error: {:#}", e),
            Err(e) => return Err(e),
        }
    }
    client.quit().await
}

// Returns false when the session should end
async fn run_one(client: &mut Client, line: &str, workdir: &Path) -> Result<bool> {
    match Command::parse_line(line) {
        Command::Quit => Ok(false),
        Command::Get(name) => {
            match client.get(&name, workdir).await? {
                GetOutcome::Saved { path, bytes, header } => {
                    println!("{}", header);
                    println!("Saved {} bytes to {}", bytes, path.display());
                }
                GetOutcome::Message(msg) => print!("{}", msg),
            }
            Ok(true)
        }
        Command::Put(name) => {
            let local = workdir.join(&name);
            let reply = if local.is_file() {
                client.put(&name, &local).await?
            } else {
                client.request(line).await?
            };
            print!("{}", String::from_utf8_lossy(&reply));
            Ok(true)
        }
        _ => {
            let reply = client.request(line).await?;
            print!("{}", String::from_utf8_lossy(&reply));
            Ok(true)
        }
    }
}

fn print_prompt() {
    use std::io::Write;
    print!("> ");
    let _ = std::io::stdout().flush();
}
