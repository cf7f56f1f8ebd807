//! Server configuration
//!
//! Parsed from command line flags with environment variable fallbacks.

use std::time::Duration;

use clap::Parser;

use crate::codec::DEFAULT_MAX_LINE_LENGTH;
use crate::error::AppError;

/// Line-delimited chat server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "line_chat_server", version, about = "Line-delimited JSON chat server")]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(long, env = "CHAT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "CHAT_PORT", default_value_t = 12345)]
    pub port: u16,

    /// Maximum concurrent active sessions
    #[arg(long, env = "CHAT_MAX_CONNECTIONS", default_value_t = 100)]
    pub max_connections: usize,

    /// Close connections that send nothing for this many seconds (0 disables)
    #[arg(long, env = "CHAT_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,

    /// Close connections that have not logged in after this many seconds
    #[arg(long, env = "CHAT_HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Give up on a single frame write after this many seconds
    #[arg(long, env = "CHAT_WRITE_TIMEOUT_SECS", default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// Longest accepted inbound line, in bytes
    #[arg(long, env = "CHAT_MAX_LINE_LENGTH", default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,

    /// Frames queued per connection before it is evicted as stalled
    #[arg(long, env = "CHAT_OUTBOUND_BUFFER", default_value_t = 256)]
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 12345,
            max_connections: 100,
            idle_timeout_secs: 600,
            handshake_timeout_secs: 10,
            write_timeout_secs: 10,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_buffer: 256,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        let zero = [
            ("max_connections", self.max_connections == 0),
            ("handshake_timeout_secs", self.handshake_timeout_secs == 0),
            ("write_timeout_secs", self.write_timeout_secs == 0),
            ("max_line_length", self.max_line_length == 0),
            ("outbound_buffer", self.outbound_buffer == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((name, _)) => Err(AppError::InvalidConfig(format!("{} must be positive", name))),
            None => Ok(()),
        }
    }

    /// Per-connection settings handed to every session
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            max_line_length: self.max_line_length,
            outbound_buffer: self.outbound_buffer,
        }
    }
}

/// Settings each session needs, copied into its task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// None disables the idle check
    pub idle_timeout: Option<Duration>,
    /// Always enforced, even with the idle check disabled
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub max_line_length: usize,
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        ServerConfig::default().session()
    }
}
