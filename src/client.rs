//! Client struct definition
//!
//! The hub-side view of an active session: its identity and the queue
//! feeding that session's writer task.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendError;
use crate::frame::Frame;
use crate::types::ClientId;

/// Active session as seen by the registry
///
/// Holds the session's unique ID, its immutable username and the sender
/// half of its outbound queue. The writer task owns the socket; this handle
/// only enqueues.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this session
    pub id: ClientId,
    /// Username announced in the login frame
    pub username: String,
    /// Server → Client frame queue
    sender: mpsc::Sender<Frame>,
}

impl Client {
    /// Create a new client with the given ID, username and sender channel
    pub fn new(id: ClientId, username: String, sender: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            username,
            sender,
        }
    }

    /// Queue a frame for this client without waiting
    ///
    /// Fails if the session has gone away or its queue is full because the
    /// peer stopped reading.
    pub fn try_send(&self, frame: Frame) -> Result<(), SendError> {
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}
