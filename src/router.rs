//! Broadcast and private-send fan-out
//!
//! Every function enqueues into recipients' outbound queues and never
//! touches a socket. A recipient that cannot take a frame is reported back
//! instead of being skipped, so the hub can evict it rather than leave a gap
//! in its stream.

use tracing::{debug, warn};

use crate::frame::Frame;
use crate::registry::ClientRegistry;
use crate::types::ClientId;

/// A session whose queue refused a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undelivered {
    pub client_id: ClientId,
    pub username: String,
}

/// Send a `message` frame with `content` to every active session
///
/// Returns the sessions that could not accept it.
pub fn broadcast_message(registry: &ClientRegistry, content: &str) -> Vec<Undelivered> {
    fan_out(registry, &Frame::message(content))
}

/// Send a `message` frame with `content` to one session
///
/// `Ok(false)` means the recipient is not active and the message was dropped.
pub fn send_private(
    registry: &ClientRegistry,
    recipient: &str,
    content: &str,
) -> Result<bool, Undelivered> {
    let Some(client) = registry.lookup(recipient) else {
        debug!("Dropping private message to unknown user '{}'", recipient);
        return Ok(false);
    };

    match client.try_send(Frame::message(content)) {
        Ok(()) => Ok(true),
        Err(e) => {
            warn!("Private message to '{}' failed: {}", recipient, e);
            Err(Undelivered {
                client_id: client.id,
                username: client.username.clone(),
            })
        }
    }
}

/// Send the current `user_count` to every active session
pub fn broadcast_user_count(registry: &ClientRegistry) -> Vec<Undelivered> {
    let roster = registry.snapshot();
    fan_out(registry, &roster.count_frame())
}

/// Send the current `user_list` to every active session
pub fn broadcast_user_list(registry: &ClientRegistry) -> Vec<Undelivered> {
    let roster = registry.snapshot();
    fan_out(registry, &roster.list_frame())
}

/// Send `user_count` then `user_list`
///
/// A session that fails either frame is reported once.
pub fn broadcast_roster(registry: &ClientRegistry) -> Vec<Undelivered> {
    let mut failed = broadcast_user_count(registry);
    for undelivered in broadcast_user_list(registry) {
        if !failed.contains(&undelivered) {
            failed.push(undelivered);
        }
    }
    failed
}

fn fan_out(registry: &ClientRegistry, frame: &Frame) -> Vec<Undelivered> {
    let mut failed = Vec::new();
    for client in registry.clients() {
        if let Err(e) = client.try_send(frame.clone()) {
            warn!(
                "Cannot queue {} frame for '{}': {}",
                frame.kind(),
                client.username,
                e
            );
            failed.push(Undelivered {
                client_id: client.id,
                username: client.username.clone(),
            });
        }
    }
    failed
}
