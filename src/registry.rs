//! Client registry
//!
//! Maps usernames to active sessions. The hub actor owns the only instance,
//! so no locking happens here; every method runs inside the hub's loop.

use std::collections::BTreeMap;

use crate::client::Client;
use crate::error::AppError;
use crate::frame::Frame;
use crate::types::ClientId;

/// Point-in-time copy of the active usernames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    /// Usernames in ascending order
    pub users: Vec<String>,
}

impl Roster {
    /// Number of active users
    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Build the `user_count` frame for this roster
    pub fn count_frame(&self) -> Frame {
        Frame::user_count(self.count())
    }

    /// Build the `user_list` frame for this roster
    pub fn list_frame(&self) -> Frame {
        Frame::user_list(&self.users)
    }
}

/// Username → active session
///
/// Every key equals its value's `username`. Keys are kept sorted so
/// snapshots are deterministic.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Client>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session under its username
    ///
    /// Rejects the session if the username is already taken; the existing
    /// entry is left untouched.
    pub fn add(&mut self, client: Client) -> Result<(), AppError> {
        if self.clients.contains_key(&client.username) {
            return Err(AppError::UsernameConflict(client.username));
        }
        self.clients.insert(client.username.clone(), client);
        Ok(())
    }

    /// Remove the session registered under `username`
    ///
    /// Only removes the entry if it belongs to `client_id`. Returns None when
    /// there was nothing to remove.
    pub fn remove(&mut self, username: &str, client_id: ClientId) -> Option<Client> {
        match self.clients.get(username) {
            Some(client) if client.id == client_id => self.clients.remove(username),
            _ => None,
        }
    }

    /// Find the session for a username
    pub fn lookup(&self, username: &str) -> Option<&Client> {
        self.clients.get(username)
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Copy the current usernames
    pub fn snapshot(&self) -> Roster {
        Roster {
            users: self.clients.keys().cloned().collect(),
        }
    }

    /// Iterate over active sessions in username order
    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }
}
