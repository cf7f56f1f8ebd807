//! Error types for the chat server
//!
//! Defines session/server errors, per-recipient send errors and codec errors.
//! Uses thiserror for ergonomic error definitions.

use std::time::Duration;

use thiserror::Error;

/// Application-level errors
///
/// Everything except `Bind` and `InvalidConfig` is local to one connection:
/// the session runs its Closing transition and the server keeps serving.
#[derive(Debug, Error)]
pub enum AppError {
    /// Could not bind the listening endpoint (process-fatal)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error on the connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unrecognized frame
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Peer sent a line longer than the configured ceiling
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// First frame on a connection was not a login frame
    #[error("expected login frame, got {0}")]
    HandshakeRequired(&'static str),

    /// Username is empty or cannot be represented in a user list
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),

    /// Another active session already uses this username
    #[error("username '{0}' is already taken")]
    UsernameConflict(String),

    /// Registry reached the configured maximum
    #[error("server is full")]
    ServerFull,

    /// No login frame arrived within the handshake timeout
    #[error("no login within {0:?}")]
    HandshakeTimeout(Duration),

    /// No line arrived within the idle timeout
    #[error("idle for more than {0:?}")]
    IdleTimeout(Duration),

    /// A single frame write did not complete in time
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Channel send error (fatal - hub is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// The connection's writer task panicked or was cancelled
    #[error("writer task failed: {0}")]
    WriterTask(#[from] tokio::task::JoinError),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Message send errors
///
/// Occurs when a frame cannot be queued for one recipient.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The recipient's outbound queue is full
    #[error("Outbound queue full")]
    QueueFull,
}

/// Frame decoding error
///
/// Covers both invalid JSON and a `type` outside the recognized set.
#[derive(Debug, Error)]
#[error("malformed frame: {0}")]
pub struct DecodeError(#[from] serde_json::Error);
