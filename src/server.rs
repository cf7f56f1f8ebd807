//! ChatServer actor implementation
//!
//! The hub owns the client registry outright. Sessions and the listener reach
//! it through `ServerHandle`, which queues commands on an mpsc channel, so
//! registry mutation, snapshots and fan-out are serialized without locks.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::AppError;
use crate::frame::Frame;
use crate::registry::ClientRegistry;
use crate::router::{self, Undelivered};
use crate::types::ClientId;

/// Default capacity of the hub's command queue
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Commands sent from sessions to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// Session finished its handshake and wants to become active
    Join {
        client_id: ClientId,
        username: String,
        sender: mpsc::Sender<Frame>,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    /// Session is closing
    Leave {
        client_id: ClientId,
        username: String,
    },
    /// Message for every active session
    Broadcast {
        from: String,
        content: String,
    },
    /// Message for one named session
    Private {
        from: String,
        recipient: String,
        content: String,
    },
}

/// The main ChatServer actor
///
/// Processes commands one at a time. Handlers only enqueue frames, so a
/// stalled peer never holds up the loop.
pub struct ChatServer {
    /// Active sessions keyed by username
    registry: ClientRegistry,
    /// Join requests beyond this size are refused
    max_connections: usize,
    /// Publishes the registry size after every change
    online: watch::Sender<usize>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        online: watch::Sender<usize>,
        max_connections: usize,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(),
            max_connections,
            online,
            receiver,
        }
    }

    /// Spawn the actor on the current runtime and return its handle
    pub fn start(max_connections: usize) -> ServerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(DEFAULT_COMMAND_BUFFER);
        let (online_tx, online_rx) = watch::channel(0);
        let server = ChatServer::new(cmd_rx, online_tx, max_connections);
        tokio::spawn(server.run());
        ServerHandle::new(cmd_tx, online_rx)
    }

    /// Serve commands until every `ServerHandle` is gone
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Join {
                client_id,
                username,
                sender,
                reply,
            } => {
                self.handle_join(client_id, username, sender, reply);
            }
            ServerCommand::Leave {
                client_id,
                username,
            } => {
                self.handle_leave(client_id, &username);
            }
            ServerCommand::Broadcast { from, content } => {
                self.handle_broadcast(&from, &content);
            }
            ServerCommand::Private {
                from,
                recipient,
                content,
            } => {
                self.handle_private(&from, &recipient, &content);
            }
        }
    }

    /// Handle a session entering Active
    fn handle_join(
        &mut self,
        client_id: ClientId,
        username: String,
        sender: mpsc::Sender<Frame>,
        reply: oneshot::Sender<Result<(), AppError>>,
    ) {
        if self.registry.len() >= self.max_connections {
            warn!(
                "Max connections ({}) reached, refusing '{}'",
                self.max_connections, username
            );
            let _ = reply.send(Err(AppError::ServerFull));
            return;
        }

        let client = Client::new(client_id, username.clone(), sender.clone());
        if let Err(err) = self.registry.add(client) {
            warn!("Client {} refused: {}", client_id, err);
            let _ = sender.try_send(Frame::message(format!(
                "Username '{}' is already taken.",
                username
            )));
            let _ = reply.send(Err(err));
            return;
        }
        self.publish_online();

        // Session gave up waiting; undo silently
        if reply.is_closed() {
            debug!("Client {} vanished before activation", client_id);
            self.registry.remove(&username, client_id);
            self.publish_online();
            return;
        }

        info!("{} has joined the chat.", username);
        self.broadcast_text(&format!("{} has joined the chat.", username));
        self.refresh_roster();
        debug!("Total clients: {}", self.registry.len());

        if reply.send(Ok(())).is_err() {
            self.depart(client_id, &username);
        }
    }

    /// Handle a session closing
    fn handle_leave(&mut self, client_id: ClientId, username: &str) {
        if self.depart(client_id, username) {
            info!("{} has left the chat.", username);
        }
    }

    /// Handle a public chat message
    fn handle_broadcast(&mut self, from: &str, content: &str) {
        self.broadcast_text(&format!("{}: {}", from, content));
        debug!("Broadcast from '{}' to {} clients", from, self.registry.len());
    }

    /// Handle a private chat message
    fn handle_private(&mut self, from: &str, recipient: &str, content: &str) {
        let text = format!("{} (private): {}", from, content);
        match router::send_private(&self.registry, recipient, &text) {
            Ok(true) => debug!("Private message from '{}' to '{}'", from, recipient),
            Ok(false) => {}
            Err(undelivered) => self.evict(vec![undelivered]),
        }
    }

    /// Remove a session and tell everyone else
    ///
    /// Returns false if the session was not registered.
    fn depart(&mut self, client_id: ClientId, username: &str) -> bool {
        // Held until the end so the session's writer drains after the count is published
        let Some(_departed) = self.registry.remove(username, client_id) else {
            return false;
        };
        self.publish_online();

        self.broadcast_text(&format!("{} has left the chat.", username));
        self.refresh_roster();
        debug!("Total clients: {}", self.registry.len());
        true
    }

    /// Drop sessions whose queue refused a frame
    ///
    /// Removing the entry drops the hub's sender, so the session's writer
    /// flushes what is already queued and then closes the socket.
    fn evict(&mut self, failed: Vec<Undelivered>) {
        for Undelivered {
            client_id,
            username,
        } in failed
        {
            if self.depart(client_id, &username) {
                warn!("Evicted '{}': outbound queue unavailable", username);
            }
        }
    }

    fn broadcast_text(&mut self, text: &str) {
        let failed = router::broadcast_message(&self.registry, text);
        self.evict(failed);
    }

    fn refresh_roster(&mut self) {
        let failed = router::broadcast_roster(&self.registry);
        self.evict(failed);
    }

    fn publish_online(&self) {
        self.online.send_replace(self.registry.len());
    }
}

/// Cloneable front end to the ChatServer actor
#[derive(Debug, Clone)]
pub struct ServerHandle {
    commands: mpsc::Sender<ServerCommand>,
    online: watch::Receiver<usize>,
}

impl ServerHandle {
    /// Wrap a command sender and the actor's online-count receiver
    pub fn new(commands: mpsc::Sender<ServerCommand>, online: watch::Receiver<usize>) -> Self {
        Self { commands, online }
    }

    /// Most recently published number of active sessions
    pub fn online_count(&self) -> usize {
        *self.online.borrow()
    }

    /// Ask the hub to activate a session
    ///
    /// On success the session is registered and everyone has been sent the
    /// join notice and refreshed roster.
    pub async fn join(
        &self,
        client_id: ClientId,
        username: String,
        sender: mpsc::Sender<Frame>,
    ) -> Result<(), AppError> {
        let (reply, response) = oneshot::channel();
        self.send(ServerCommand::Join {
            client_id,
            username,
            sender,
            reply,
        })
        .await?;
        response.await.map_err(|_| AppError::ChannelSend)?
    }

    /// Deregister a session; a no-op if it was never active
    pub async fn leave(&self, client_id: ClientId, username: String) -> Result<(), AppError> {
        self.send(ServerCommand::Leave {
            client_id,
            username,
        })
        .await
    }

    /// Broadcast `content` on behalf of `from`
    pub async fn broadcast(&self, from: String, content: String) -> Result<(), AppError> {
        self.send(ServerCommand::Broadcast { from, content }).await
    }

    /// Send `content` from `from` to `recipient` only
    pub async fn send_private(
        &self,
        from: String,
        recipient: String,
        content: String,
    ) -> Result<(), AppError> {
        self.send(ServerCommand::Private {
            from,
            recipient,
            content,
        })
        .await
    }

    async fn send(&self, cmd: ServerCommand) -> Result<(), AppError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| AppError::ChannelSend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn join(
        server: &ServerHandle,
        name: &str,
    ) -> (ClientId, Result<(), AppError>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(32);
        let id = ClientId::new();
        let result = server.join(id, name.to_string(), tx).await;
        (id, result, rx)
    }

    async fn next(rx: &mut mpsc::Receiver<Frame>) -> Frame {
        rx.recv().await.expect("queue closed")
    }

    #[tokio::test]
    async fn test_join_announces_and_refreshes_roster() {
        let server = ChatServer::start(10);

        let (_, result, mut alice) = join(&server, "alice").await;
        result.unwrap();
        assert_eq!(server.online_count(), 1);
        assert_eq!(next(&mut alice).await, Frame::message("alice has joined the chat."));
        assert_eq!(next(&mut alice).await, Frame::user_count(1));
        assert_eq!(next(&mut alice).await, Frame::user_list(&["alice"]));

        let (_, result, mut bob) = join(&server, "bob").await;
        result.unwrap();
        for rx in [&mut alice, &mut bob] {
            assert_eq!(next(rx).await, Frame::message("bob has joined the chat."));
            assert_eq!(next(rx).await, Frame::user_count(2));
            assert_eq!(next(rx).await, Frame::user_list(&["alice", "bob"]));
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_gets_notice() {
        let server = ChatServer::start(10);
        let (_, first, _alice) = join(&server, "alice").await;
        first.unwrap();

        let (_, second, mut impostor) = join(&server, "alice").await;

        assert!(matches!(second, Err(AppError::UsernameConflict(_))));
        assert_eq!(
            next(&mut impostor).await,
            Frame::message("Username 'alice' is already taken.")
        );
        // Hub dropped its sender after the notice
        assert_eq!(impostor.recv().await, None);
        assert_eq!(server.online_count(), 1);
    }

    #[tokio::test]
    async fn test_join_refused_when_full() {
        let server = ChatServer::start(1);
        let (_, first, _alice) = join(&server, "alice").await;
        first.unwrap();

        let (_, second, mut bob) = join(&server, "bob").await;

        assert!(matches!(second, Err(AppError::ServerFull)));
        assert_eq!(bob.recv().await, None);
        assert_eq!(server.online_count(), 1);
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining() {
        let server = ChatServer::start(10);
        let (alice_id, _, mut alice) = join(&server, "alice").await;
        let (bob_id, _, bob) = join(&server, "bob").await;
        drop(bob);
        for _ in 0..6 {
            next(&mut alice).await;
        }

        server.leave(bob_id, "bob".to_string()).await.unwrap();
        server.broadcast("alice".to_string(), "still here".to_string()).await.unwrap();

        assert_eq!(next(&mut alice).await, Frame::message("bob has left the chat."));
        assert_eq!(next(&mut alice).await, Frame::user_count(1));
        assert_eq!(next(&mut alice).await, Frame::user_list(&["alice"]));
        assert_eq!(next(&mut alice).await, Frame::message("alice: still here"));
        assert_eq!(server.online_count(), 1);

        // Repeated leave changes nothing
        server.leave(bob_id, "bob".to_string()).await.unwrap();
        server.leave(alice_id, "alice".to_string()).await.unwrap();
        server.broadcast("x".to_string(), "y".to_string()).await.unwrap();
        assert_eq!(alice.recv().await, None);
        assert_eq!(server.online_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_session_is_evicted() {
        let server = ChatServer::start(10);
        // Room for exactly its own join traffic
        let (tx, mut stalled) = mpsc::channel(3);
        server
            .join(ClientId::new(), "stalled".to_string(), tx)
            .await
            .unwrap();

        let (_, result, mut alice) = join(&server, "alice").await;
        result.unwrap();

        assert_eq!(next(&mut alice).await, Frame::message("alice has joined the chat."));
        assert_eq!(next(&mut alice).await, Frame::message("stalled has left the chat."));
        assert_eq!(next(&mut alice).await, Frame::user_count(1));
        assert_eq!(next(&mut alice).await, Frame::user_list(&["alice"]));
        assert_eq!(server.online_count(), 1);

        // Queued frames survive; then the queue closes
        assert_eq!(next(&mut stalled).await, Frame::message("stalled has joined the chat."));
        assert_eq!(next(&mut stalled).await, Frame::user_count(1));
        assert_eq!(next(&mut stalled).await, Frame::user_list(&["stalled"]));
        assert_eq!(stalled.recv().await, None);
    }

    #[tokio::test]
    async fn test_private_to_stalled_session_evicts_it() {
        let server = ChatServer::start(10);
        let (_, _, mut alice) = join(&server, "alice").await;
        let (tx, mut bob) = mpsc::channel(3);
        server.join(ClientId::new(), "bob".to_string(), tx).await.unwrap();
        for _ in 0..6 {
            next(&mut alice).await;
        }

        server
            .send_private("alice".to_string(), "bob".to_string(), "hi".to_string())
            .await
            .unwrap();

        assert_eq!(next(&mut alice).await, Frame::message("bob has left the chat."));
        assert_eq!(next(&mut alice).await, Frame::user_count(1));
        assert_eq!(next(&mut alice).await, Frame::user_list(&["alice"]));
        for _ in 0..3 {
            next(&mut bob).await;
        }
        assert_eq!(bob.recv().await, None);
        assert_eq!(server.online_count(), 1);
    }

    #[tokio::test]
    async fn test_private_message_routing() {
        let server = ChatServer::start(10);
        let (_, _, mut alice) = join(&server, "alice").await;
        let (_, _, mut bob) = join(&server, "bob").await;
        // Drain join traffic: alice saw two joins, bob saw one
        for _ in 0..6 {
            next(&mut alice).await;
        }
        for _ in 0..3 {
            next(&mut bob).await;
        }

        server
            .send_private("alice".to_string(), "bob".to_string(), "hi".to_string())
            .await
            .unwrap();
        server
            .send_private("alice".to_string(), "ghost".to_string(), "boo".to_string())
            .await
            .unwrap();
        server.broadcast("bob".to_string(), "done".to_string()).await.unwrap();

        assert_eq!(next(&mut bob).await, Frame::message("alice (private): hi"));
        assert_eq!(next(&mut bob).await, Frame::message("bob: done"));
        assert_eq!(next(&mut alice).await, Frame::message("bob: done"));
    }
}
