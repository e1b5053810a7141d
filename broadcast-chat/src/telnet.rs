//! Line-oriented stream adapter (telnet, netcat).
//!
//! Each accepted connection runs [`run_session`]: greet, read a nickname,
//! register with the hub, then pump lines both ways until either direction
//! of the transport fails.

use std::{io, net::SocketAddr};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    client::{ClientHandle, ClientId, Conduit, ConnectionState, Inbox},
    hub::HubHandle,
    message::ChatMessage,
};

const GREETING: &str = "\x1b[1;30;41mWelcome to the fancy demo chat!\x1b[0m\n";
const NICK_PROMPT: &str = "What is your nick? ";
const REJECTION: &str = "Invalid Username\n";

/// Longest line, newline included, a peer may send before the session is cut.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

pub struct LineServer {
    listener: TcpListener,
    hub: HubHandle,
    outbox_capacity: usize,
}

impl LineServer {
    pub fn new(listener: TcpListener, hub: HubHandle, outbox_capacity: usize) -> Self {
        Self {
            listener,
            hub,
            outbox_capacity,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever. Accept errors are logged and skipped.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    spawn_session(stream, peer, self.hub.clone(), self.outbox_capacity)
                }
                Err(err) => warn!(error = ?err, "failed to accept connection"),
            }
        }
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, hub: HubHandle, outbox_capacity: usize) {
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        let reader = BufReader::new(reader);
        let result = run_session(reader, writer, peer.to_string(), hub, outbox_capacity).await;
        if let Err(err) = result {
            warn!(%peer, error = ?err, "connection closed with error");
        }
    });
}

struct Session {
    id: ClientId,
    state: ConnectionState,
}

impl Session {
    fn new(id: ClientId) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(client = %self.id, from = %self.state, to = %next, "connection state changed");
        self.state = next;
    }
}

/// Drives one stream connection through its whole lifecycle.
///
/// `id` is the registry key, normally the peer address. Returns once the
/// connection is closed; transport failures after registration end the
/// session quietly rather than surfacing as errors.
pub async fn run_session<R, W>(
    mut reader: R,
    mut writer: W,
    id: ClientId,
    hub: HubHandle,
    outbox_capacity: usize,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = Session::new(id);
    session.advance(ConnectionState::AwaitingIdentity);

    let nickname = match prompt_nickname(&mut reader, &mut writer).await? {
        Some(nickname) => nickname,
        None => {
            if let Err(err) = write_text(&mut writer, REJECTION).await {
                debug!(client = %session.id, error = ?err, "failed to send rejection");
            }
            session.advance(ConnectionState::Closed);
            info!(client = %session.id, "rejected blank nickname");
            return Ok(());
        }
    };

    let (conduit, inbox) = Conduit::new(outbox_capacity);
    let handle = ClientHandle::stream(session.id.clone(), nickname);
    hub.register(handle.id(), conduit);
    session.advance(ConnectionState::Active);
    info!(client = handle.id(), nickname = handle.nickname(), "client joined");

    let welcome = format!("Welcome, {}!\n\n", handle.nickname());
    let outcome = match write_text(&mut writer, &welcome).await {
        Ok(()) => {
            hub.submit(ChatMessage::joined(handle.nickname()));
            exchange_lines(&mut reader, &mut writer, &handle, &hub, inbox).await
        }
        Err(err) => Err(err),
    };

    session.advance(ConnectionState::Closed);
    hub.deregister(handle.id());
    hub.submit(ChatMessage::left(handle.nickname()));

    match outcome {
        Ok(()) => info!(client = handle.id(), nickname = handle.nickname(), "client left"),
        Err(err) => info!(
            client = handle.id(),
            nickname = handle.nickname(),
            error = %err,
            "client dropped"
        ),
    }

    Ok(())
}

/// Sends the greeting and prompt, then reads one line as the nickname.
/// `None` means the answer was blank or the peer hung up first.
async fn prompt_nickname<R, W>(reader: &mut R, writer: &mut W) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(GREETING.as_bytes()).await?;
    write_text(writer, NICK_PROMPT).await?;

    let mut line = Vec::new();
    read_line_bounded(reader, &mut line).await?;
    let nickname = String::from_utf8_lossy(&line).trim().to_string();

    Ok((!nickname.is_empty()).then_some(nickname))
}

/// Runs the inbound and outbound loops side by side. Whichever finishes
/// first ends the session and the other is dropped with it.
async fn exchange_lines<R, W>(
    reader: &mut R,
    writer: &mut W,
    handle: &ClientHandle,
    hub: &HubHandle,
    inbox: Inbox,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    select! {
        result = forward_lines(reader, handle, hub) => result,
        result = deliver_messages(writer, inbox) => result,
    }
}

async fn forward_lines<R>(reader: &mut R, handle: &ClientHandle, hub: &HubHandle) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        read_line_bounded(reader, &mut line).await?;
        // A trailing fragment without a newline only shows up at EOF.
        if line.last() != Some(&b'\n') {
            return Ok(());
        }
        hub.submit(handle.message(&String::from_utf8_lossy(&line)));
    }
}

/// Reads up to and including the next newline. Fails with `InvalidData` when
/// `MAX_LINE_BYTES` arrive without one; a short read without a newline is EOF.
async fn read_line_bounded<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', line)
        .await?;
    if read as u64 == MAX_LINE_BYTES && line.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {MAX_LINE_BYTES} bytes"),
        ));
    }
    Ok(())
}

async fn deliver_messages<W>(writer: &mut W, mut inbox: Inbox) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        write_text(writer, &message.render()).await?;
    }
    Ok(())
}

async fn write_text<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}
