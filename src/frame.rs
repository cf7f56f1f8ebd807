//! Wire frame definitions
//!
//! One JSON object per line, discriminated by its `type` field using Serde's
//! tagged enum. Absent fields decode as empty values rather than errors.

use serde::{Deserialize, Serialize};

/// Separator used in `user_list` frames
pub const USER_LIST_SEPARATOR: char = ',';

/// A single protocol frame, in either direction
///
/// Clients send `login` once and then `message` frames. The server sends
/// `message`, `user_count` and `user_list` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Handshake carrying the already-authenticated username
    Login {
        #[serde(default)]
        username: String,
    },
    /// Chat text; `recipient` selects a private send
    Message {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },
    /// Number of active sessions
    UserCount {
        #[serde(default)]
        count: u64,
    },
    /// Comma-joined usernames of active sessions
    UserList {
        #[serde(default)]
        users: String,
    },
}

impl Frame {
    /// Create a login frame
    pub fn login(username: impl Into<String>) -> Self {
        Frame::Login {
            username: username.into(),
        }
    }

    /// Create a message frame with no recipient
    pub fn message(content: impl Into<String>) -> Self {
        Frame::Message {
            content: content.into(),
            recipient: None,
        }
    }

    /// Create a message frame addressed to one user
    pub fn private(recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Frame::Message {
            content: content.into(),
            recipient: Some(recipient.into()),
        }
    }

    /// Create a user count frame
    pub fn user_count(count: usize) -> Self {
        Frame::UserCount {
            count: count as u64,
        }
    }

    /// Create a user list frame from usernames in order
    pub fn user_list<S: AsRef<str>>(users: &[S]) -> Self {
        let separator = USER_LIST_SEPARATOR.to_string();
        let users = users
            .iter()
            .map(|user| user.as_ref())
            .collect::<Vec<&str>>()
            .join(separator.as_str());
        Frame::UserList { users }
    }

    /// Wire name of this frame's type
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Login { .. } => "login",
            Frame::Message { .. } => "message",
            Frame::UserCount { .. } => "user_count",
            Frame::UserList { .. } => "user_list",
        }
    }

    /// Split a `user_list` frame back into usernames
    ///
    /// Returns None for other frame types. An empty list yields no names.
    pub fn users(&self) -> Option<Vec<&str>> {
        match self {
            Frame::UserList { users } if users.is_empty() => Some(Vec::new()),
            Frame::UserList { users } => Some(users.split(USER_LIST_SEPARATOR).collect()),
            _ => None,
        }
    }
}
