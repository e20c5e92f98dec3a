use anyhow::Result;
use ferry::client::{run_shell, Client, GetOutcome};
use ferry::config::ServerConfig;
use ferry::frame::{is_peer_closed, FrameReader};
use ferry::logger::NoopLogger;
use ferry::server::Server;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

async fn start_server(root: &Path, max_clients: usize) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let config = ServerConfig {
        bind_host: "127.0.0.1".into(),
        root: root.to_path_buf(),
        max_clients,
        upload_idle: Duration::from_millis(200),
        ..Default::default()
    };
    let server = Server::bind(&config, Arc::new(NoopLogger)).await?;
    let addr = server.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });
    Ok((addr, handle))
}

async fn connect(addr: SocketAddr) -> Result<Client> {
    Client::connect(&addr.ip().to_string(), addr.port()).await
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).expect("utf8 reply")
}

#[tokio::test]
async fn files_lists_single_file() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    std::fs::write(srv_tmp.path().join("a.txt"), b"hello")?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    let mut client = connect(addr).await?;
    let reply = text(client.request("Files").await?);
    assert!(reply.starts_with("List of Files:\n"));
    assert!(reply.contains("a.txt\t"));
    assert!(reply.contains("Total Files: 1\n"));

    server.abort();
    Ok(())
}

#[tokio::test]
async fn unknown_command_is_reported() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    let mut client = connect(addr).await?;
    let reply = text(client.request("Foo").await?);
    assert!(reply.starts_with("Invalid command"));
    // Connection is still usable afterwards
    let reply = text(client.request("List").await?);
    assert!(reply.contains("Total Clients: 1"));

    server.abort();
    Ok(())
}

#[tokio::test]
async fn list_enumerates_every_connected_peer() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    let mut first = connect(addr).await?;
    let mut second = connect(addr).await?;
    // Make sure both have been accepted before listing
    second.request("Files").await?;
    first.request("Files").await?;

    let reply = text(first.request("List").await?);
    let lines: Vec<&str> = reply.lines().collect();
    assert_eq!(lines.first(), Some(&"Connected Clients:"));
    let peers: Vec<&&str> = lines.iter().filter(|l| l.starts_with("127.0.0.1:")).collect();
    assert_eq!(peers.len(), 2);
    assert_eq!(lines.last(), Some(&"Total Clients: 2"));

    server.abort();
    Ok(())
}

#[tokio::test]
async fn put_then_get_from_another_connection_is_identical() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let cli_tmp = tempfile::tempdir()?;
    let out_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    // Several chunks worth of data, free of the sentinel byte
    let content: Vec<u8> = (0..50_000u32).map(|i| b'A' + (i % 26) as u8).collect();
    let local = cli_tmp.path().join("upload.bin");
    std::fs::write(&local, &content)?;

    let mut uploader = connect(addr).await?;
    let ack = text(uploader.put("upload.bin", &local).await?);
    let ack_lines: Vec<&str> = ack.lines().collect();
    assert!(ack_lines[0].starts_with("OK "));
    assert_eq!(ack_lines.len(), 3);
    assert_eq!(std::fs::read(srv_tmp.path().join("upload.bin"))?, content);

    let mut downloader = connect(addr).await?;
    match downloader.get("upload.bin", out_tmp.path()).await? {
        GetOutcome::Saved { path, bytes, header } => {
            assert_eq!(bytes, content.len() as u64);
            assert!(header.contains("Size: 50000 bytes"));
            assert_eq!(std::fs::read(path)?, content);
        }
        other => panic!("unexpected reply: {:?}", other),
    }

    server.abort();
    Ok(())
}

#[tokio::test]
async fn get_missing_file_is_a_message_not_a_file() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let out_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    let mut client = connect(addr).await?;
    let outcome = client.get("ghost.txt", out_tmp.path()).await?;
    assert_eq!(outcome, GetOutcome::Message("File not found: ghost.txt\n".into()));
    assert!(!out_tmp.path().join("ghost.txt").exists());

    server.abort();
    Ok(())
}

#[tokio::test]
async fn client_over_capacity_is_told_and_closed() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 2).await?;

    let mut a = connect(addr).await?;
    let mut b = connect(addr).await?;
    a.request("List").await?;
    b.request("List").await?;

    let mut extra = FrameReader::new(TcpStream::connect(addr).await?);
    let reply = text(extra.read_frame().await?);
    assert_eq!(reply, "Server full: maximum 2 clients connected\n");
    let err = extra.read_frame().await.unwrap_err();
    assert!(is_peer_closed(&err));

    // Tracked clients are unaffected
    let reply = text(a.request("List").await?);
    assert!(reply.contains("Total Clients: 2"));

    server.abort();
    Ok(())
}

#[tokio::test]
async fn peer_dropping_mid_upload_does_not_stop_server() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    let mut dropper = TcpStream::connect(addr).await?;
    dropper.write_all(b"Put partial.bin\nsome bytes").await?;
    dropper.flush().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(dropper);

    let mut client = connect(addr).await?;
    let reply = text(client.request("Files").await?);
    assert!(reply.contains("partial.bin\t"));
    assert_eq!(std::fs::read(srv_tmp.path().join("partial.bin"))?, b"some bytes");

    server.abort();
    Ok(())
}

#[tokio::test]
async fn quit_ends_session_and_frees_slot() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 1).await?;

    let mut first = connect(addr).await?;
    first.request("List").await?;
    first.quit().await?;

    // Slot is released once the server has processed the Quit
    let mut last = String::new();
    for _ in 0..50 {
        let mut client = connect(addr).await?;
        if let Ok(reply) = client.request("List").await {
            last = text(reply);
            if last.contains("Total Clients: 1") {
                server.abort();
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("slot never freed, last reply: {:?}", last);
}

#[tokio::test]
async fn lone_sentinel_between_commands_gets_no_reply() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    let mut raw = FrameReader::new(TcpStream::connect(addr).await?);
    raw.get_mut().write_all(b"List").await?;
    let reply = text(raw.read_frame().await?);
    assert!(reply.starts_with("Connected Clients:\n"));

    // A stray sentinel on its own must not produce a reply of its own
    raw.get_mut().write_all(b"\x04").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    raw.get_mut().write_all(b"Files").await?;
    let reply = text(raw.read_frame().await?);
    assert!(reply.starts_with("List of Files:\n"), "reply out of step: {:?}", reply);

    server.abort();
    Ok(())
}

#[tokio::test]
#[allow(deprecated)]
async fn reset_connection_is_dropped_from_the_table() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    let mut client = connect(addr).await?;
    let mut doomed = TcpStream::connect(addr).await?;
    doomed.write_all(b"List").await?;
    let reply = text(FrameReader::new(&mut doomed).read_frame().await?);
    assert!(reply.contains("Total Clients: 2"));

    // Zero linger turns the close into a RST, so the server sees a read error
    doomed.set_linger(Some(Duration::ZERO))?;
    drop(doomed);

    let mut last = String::new();
    for _ in 0..50 {
        last = text(client.request("List").await?);
        if last.contains("Total Clients: 1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(last.contains("Total Clients: 1"), "reset peer still listed: {:?}", last);

    server.abort();
    Ok(())
}

#[tokio::test]
async fn shell_keeps_going_after_a_local_write_failure() -> Result<()> {
    let srv_tmp = tempfile::tempdir()?;
    let cli_tmp = tempfile::tempdir()?;
    std::fs::write(srv_tmp.path().join("a.txt"), b"hello")?;
    let (addr, server) = start_server(srv_tmp.path(), 10).await?;

    // Get cannot save into a directory that does not exist
    let workdir = cli_tmp.path().join("missing");
    let input: &[u8] = b"Get a.txt\nPut after.txt\nQuit\n";
    let client = connect(addr).await?;
    run_shell(client, input, &workdir).await?;

    // The Put after the failed Get still reached the server
    assert!(srv_tmp.path().join("after.txt").exists());

    server.abort();
    Ok(())
}
