use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn binary_serves_telnet_and_http() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("broadcast_chat");

    let (mut server, mut server_stdout) = spawn_server(&binary).await?;
    let (telnet_addr, api_addr) = read_listen_addrs(&mut server_stdout).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let stream = TcpStream::connect(&telnet_addr)
        .await
        .with_context(|| format!("connect to {telnet_addr}"))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(b"alice\n").await?;
    read_line_containing(&mut reader, "Welcome, alice!").await?;
    read_line_containing(&mut reader, "New user alice has joined the chat room.").await?;

    writer.write_all(b"Hello from Alice\n").await?;
    let echo = read_line_containing(&mut reader, "Hello from Alice").await?;
    assert!(echo.contains(": alice "), "unexpected echo: {echo:?}");

    let ack = reqwest::get(format!("http://{api_addr}/chat/general/bob/hi%20alice"))
        .await?
        .text()
        .await?;
    assert_eq!(ack, "sending message for:user:bob:to chan:general:\n");
    read_line_containing(&mut reader, "bob \x1b[m:hi alice").await?;

    writer.shutdown().await?;
    drop(reader);

    // The server stays up after clients disconnect; terminate it manually.
    let _ = server.kill().await;
    let _ = server.wait().await;
    let _ = log_task.await;

    Ok(())
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("--config")
        .arg("does-not-exist.toml")
        .arg("--telnet-port")
        .arg("0")
        .arg("--api-port")
        .arg("0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

/// Scans the startup log for the two `... listening on <addr>` banners.
async fn read_listen_addrs(reader: &mut BufReader<ChildStdout>) -> Result<(String, String)> {
    let mut telnet = None;
    let mut api = None;

    while telnet.is_none() || api.is_none() {
        let line = read_line(reader)
            .await?
            .context("server exited before announcing its listeners")?;
        if let Some(addr) = banner_addr(&line, "telnet listening on ") {
            telnet = Some(addr);
        } else if let Some(addr) = banner_addr(&line, "api listening on ") {
            api = Some(addr);
        }
    }

    match (telnet, api) {
        (Some(telnet), Some(api)) => Ok((telnet, api)),
        _ => Err(anyhow!("listener banners incomplete")),
    }
}

fn banner_addr(line: &str, marker: &str) -> Option<String> {
    let (_, rest) = line.split_once(marker)?;
    let addr: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '[' | ']'))
        .collect();
    addr.contains(':').then_some(addr)
}

async fn read_line_containing(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    needle: &str,
) -> Result<String> {
    loop {
        let mut line = String::new();
        let bytes = timeout(READ_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("timed out waiting for {needle:?}"))??;
        if bytes == 0 {
            return Err(anyhow!("server closed the connection before {needle:?}"));
        }
        if line.contains(needle) {
            return Ok(line);
        }
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
