//! Line-delimited chat server library
//!
//! Clients connect over TCP, announce a username with a `login` frame, then
//! exchange broadcast or private text messages while the server keeps every
//! participant updated with the live roster and online count.
//!
//! # Protocol
//! One JSON object per line, tagged by `type`:
//! - `login` (`username`) - first frame from a client
//! - `message` (`content`, optional `recipient`) - chat text in both directions
//! - `user_count` (`count`) and `user_list` (`users`, comma-joined) - server only
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the hub that owns the client registry
//! - Each connection runs a session task plus a writer task
//! - No locks needed - all registry access goes through message passing
//!
//! # Example
//! ```ignore
//! use line_chat_server::{Listener, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = Listener::bind(&ServerConfig::default()).await.unwrap();
//!     listener.run().await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod listener;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use config::{ServerConfig, SessionConfig};
pub use error::{AppError, DecodeError, SendError};
pub use frame::Frame;
pub use listener::Listener;
pub use registry::{ClientRegistry, Roster};
pub use router::Undelivered;
pub use server::{ChatServer, ServerCommand, ServerHandle};
pub use session::{handle_connection, Session, SessionState};
pub use types::ClientId;
