//! Per-connection session handling
//!
//! Reads the login frame, activates the session with the hub, then decodes
//! frames until the peer goes away. A dedicated writer task owns the write
//! half, which serializes every frame sent to this connection.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::codec::{self, FrameReader};
use crate::config::SessionConfig;
use crate::error::AppError;
use crate::frame::{Frame, USER_LIST_SEPARATOR};
use crate::server::ServerHandle;
use crate::types::ClientId;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the login frame
    Connecting,
    /// Registered and routing frames
    Active,
    /// Deregistering and releasing the socket; terminal
    Closing,
}

/// Server-side state bound to one connection
#[derive(Debug)]
pub struct Session {
    pub id: ClientId,
    pub peer: String,
    state: SessionState,
}

impl Session {
    /// Create a session in the Connecting state
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            id: ClientId::new(),
            peer: peer.into(),
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to Active; only valid from Connecting
    pub fn activate(&mut self) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }
        self.state = SessionState::Active;
        true
    }

    /// Move to Closing
    pub fn close(&mut self) {
        self.state = SessionState::Closing;
    }
}

/// Handle a new TCP connection
///
/// Runs the session to completion. The returned error only describes why the
/// connection ended; cleanup has already happened.
pub async fn handle_connection(
    stream: TcpStream,
    server: ServerHandle,
    config: SessionConfig,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (read_half, write_half) = stream.into_split();
    run_session(read_half, write_half, peer_addr, server, config).await
}

/// Drive one session over any split byte stream
pub async fn run_session<R, W>(
    reader: R,
    writer: W,
    peer: String,
    server: ServerHandle,
    config: SessionConfig,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = FrameReader::new(reader, config.max_line_length);
    let mut session = Session::new(peer);
    debug!("Session {} connecting from {}", session.id, session.peer);

    // Dropping `writer` on this path closes the connection unanswered
    let username = read_login(&mut reader, config.handshake_timeout).await?;

    let (frame_tx, frame_rx) = mpsc::channel(config.outbound_buffer);
    let mut write_task = tokio::spawn(write_loop(writer, frame_rx, config.write_timeout));

    if let Err(e) = server.join(session.id, username.clone(), frame_tx).await {
        // The hub may have queued a notice before dropping our sender
        finish_writer(write_task, config.write_timeout).await;
        return Err(e);
    }
    session.activate();
    info!("Client {} active as '{}' from {}", session.id, username, session.peer);

    let (outcome, writer_done) = tokio::select! {
        res = read_loop(&mut reader, &server, &username, config.idle_timeout) => (res, false),
        res = &mut write_task => (res.map_err(AppError::from).and_then(|r| r), true),
    };

    session.close();
    if let Err(e) = server.leave(session.id, username.clone()).await {
        warn!("Could not deregister '{}': {}", username, e);
    }

    // Leaving drops the hub's sender, so the writer drains and exits
    if !writer_done {
        finish_writer(write_task, config.write_timeout).await;
    }

    info!("Client {} ('{}') disconnected", session.id, username);
    outcome
}

/// Read and validate the login frame
///
/// The deadline covers the whole handshake, so a peer trickling bytes
/// cannot hold its slot open.
async fn read_login<R>(
    reader: &mut FrameReader<R>,
    handshake_timeout: Duration,
) -> Result<String, AppError>
where
    R: AsyncRead + Unpin,
{
    let first = time::timeout(handshake_timeout, reader.next_frame())
        .await
        .map_err(|_| AppError::HandshakeTimeout(handshake_timeout))?;
    let Some(frame) = first? else {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed before login").into());
    };

    match frame {
        Frame::Login { username } => validate_username(username),
        other => Err(AppError::HandshakeRequired(other.kind())),
    }
}

/// Reject names that cannot appear in a user list
pub fn validate_username(username: String) -> Result<String, AppError> {
    if username.trim().is_empty() || username.contains(USER_LIST_SEPARATOR) {
        return Err(AppError::InvalidUsername(username));
    }
    Ok(username)
}

/// Route frames from an active session until EOF
async fn read_loop<R>(
    reader: &mut FrameReader<R>,
    server: &ServerHandle,
    username: &str,
    idle_timeout: Option<Duration>,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = next_frame(reader, idle_timeout).await? {
        match frame {
            Frame::Message { content, recipient } => {
                match recipient.filter(|r| !r.is_empty()) {
                    Some(recipient) => {
                        server
                            .send_private(username.to_string(), recipient, content)
                            .await?
                    }
                    None => server.broadcast(username.to_string(), content).await?,
                }
            }
            other => debug!("Ignoring {} frame from '{}'", other.kind(), username),
        }
    }

    debug!("'{}' closed the connection", username);
    Ok(())
}

async fn next_frame<R>(
    reader: &mut FrameReader<R>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Frame>, AppError>
where
    R: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => time::timeout(limit, reader.next_frame())
            .await
            .map_err(|_| AppError::IdleTimeout(limit))?,
        None => reader.next_frame().await,
    }
}

/// Write queued frames until every sender is gone
async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::Receiver<Frame>,
    write_timeout: Duration,
) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        time::timeout(write_timeout, codec::write_frame(&mut writer, &frame))
            .await
            .map_err(|_| AppError::WriteTimeout(write_timeout))??;
    }

    let _ = writer.shutdown().await;
    debug!("Write task ended");
    Ok(())
}

async fn finish_writer(mut write_task: JoinHandle<Result<(), AppError>>, limit: Duration) {
    match time::timeout(limit, &mut write_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => debug!("Writer stopped early: {}", e),
        Ok(Err(e)) => warn!("Writer task failed: {}", e),
        Err(_) => {
            debug!("Writer did not drain within {:?}, aborting", limit);
            write_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ChatServer;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

    struct Peer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
        task: JoinHandle<Result<(), AppError>>,
    }

    impl Peer {
        fn connect(server: &ServerHandle, config: SessionConfig) -> Self {
            let (client, remote) = tokio::io::duplex(16 * 1024);
            let (remote_read, remote_write) = tokio::io::split(remote);
            let task = tokio::spawn(run_session(
                remote_read,
                remote_write,
                "test".to_string(),
                server.clone(),
                config,
            ));
            let (read, writer) = tokio::io::split(client);
            Self {
                lines: BufReader::new(read).lines(),
                writer,
                task,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Option<Frame> {
            let line = time::timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .expect("timed out waiting for frame")
                .ok()??;
            Some(codec::decode(&line).unwrap())
        }

        async fn finish(self) -> Result<(), AppError> {
            time::timeout(Duration::from_secs(2), self.task)
                .await
                .expect("session did not end")
                .unwrap()
        }
    }

    #[test]
    fn test_session_transitions() {
        let mut session = Session::new("peer");
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.activate());
        assert_eq!(session.state(), SessionState::Active);
        assert!(!session.activate());
        session.close();
        assert_eq!(session.state(), SessionState::Closing);
        assert!(!session.activate());
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("alice".to_string()).unwrap(), "alice");
        assert!(validate_username(String::new()).is_err());
        assert!(validate_username("   ".to_string()).is_err());
        assert!(validate_username("a,b".to_string()).is_err());
    }

    #[tokio::test]
    async fn test_login_then_broadcast_echo() {
        let server = ChatServer::start(10);
        let mut peer = Peer::connect(&server, SessionConfig::default());

        peer.send(r#"{"type":"login","username":"alice"}"#).await;
        assert_eq!(peer.recv().await, Some(Frame::message("alice has joined the chat.")));
        assert_eq!(peer.recv().await, Some(Frame::user_count(1)));
        assert_eq!(peer.recv().await, Some(Frame::user_list(&["alice"])));

        peer.send(r#"{"type":"user_count","count":7}"#).await;
        peer.send(r#"{"type":"message","content":"hi","recipient":""}"#).await;
        assert_eq!(peer.recv().await, Some(Frame::message("alice: hi")));

        peer.writer.shutdown().await.unwrap();
        assert!(peer.finish().await.is_ok());
        assert_eq!(server.online_count(), 0);
    }

    #[tokio::test]
    async fn test_first_frame_must_be_login() {
        let server = ChatServer::start(10);
        let mut peer = Peer::connect(&server, SessionConfig::default());

        peer.send(r#"{"type":"message","content":"hi"}"#).await;

        assert_eq!(peer.recv().await, None);
        assert!(matches!(
            peer.finish().await,
            Err(AppError::HandshakeRequired("message"))
        ));
        assert_eq!(server.online_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_login_closes() {
        let server = ChatServer::start(10);
        let mut peer = Peer::connect(&server, SessionConfig::default());

        peer.send("hello").await;

        assert_eq!(peer.recv().await, None);
        assert!(matches!(peer.finish().await, Err(AppError::Decode(_))));
    }

    #[tokio::test]
    async fn test_malformed_frame_ends_active_session() {
        let server = ChatServer::start(10);
        let mut peer = Peer::connect(&server, SessionConfig::default());
        peer.send(r#"{"type":"login","username":"alice"}"#).await;
        for _ in 0..3 {
            peer.recv().await;
        }

        peer.send(r#"{"type":"bogus"}"#).await;

        assert_eq!(peer.recv().await, None);
        assert!(matches!(peer.finish().await, Err(AppError::Decode(_))));
        assert_eq!(server.online_count(), 0);
    }

    #[tokio::test]
    async fn test_silent_connection_fails_handshake() {
        let server = ChatServer::start(10);
        let config = SessionConfig {
            idle_timeout: None,
            handshake_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        let mut peer = Peer::connect(&server, config);

        assert_eq!(peer.recv().await, None);
        assert!(matches!(
            peer.finish().await,
            Err(AppError::HandshakeTimeout(_))
        ));
        assert_eq!(server.online_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_session_is_reclaimed() {
        let server = ChatServer::start(10);
        let config = SessionConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..SessionConfig::default()
        };
        let mut peer = Peer::connect(&server, config);
        peer.send(r#"{"type":"login","username":"alice"}"#).await;
        for _ in 0..3 {
            peer.recv().await;
        }

        assert_eq!(peer.recv().await, None);
        assert!(matches!(peer.finish().await, Err(AppError::IdleTimeout(_))));
        assert_eq!(server.online_count(), 0);
    }
}
