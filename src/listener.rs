//! TCP listener and accept loop
//!
//! Binds the endpoint, starts the hub, and hands every accepted connection
//! to its own session task unless the server is already full. Capacity
//! counts every open connection, logged in or not.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::{ServerConfig, SessionConfig};
use crate::error::AppError;
use crate::server::{ChatServer, ServerHandle};
use crate::session::handle_connection;

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) doesn't spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound listening socket plus the hub it feeds
pub struct Listener {
    listener: TcpListener,
    server: ServerHandle,
    session: SessionConfig,
    /// One permit per open connection, held until its session task ends
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind the configured address and start the ChatServer actor
    ///
    /// Failure to bind is fatal for the process.
    pub async fn bind(config: &ServerConfig) -> Result<Self, AppError> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| AppError::Bind { addr, source })?;

        Ok(Self {
            listener,
            server: ChatServer::start(config.max_connections),
            session: config.session(),
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the hub behind this listener
    pub fn server(&self) -> ServerHandle {
        self.server.clone()
    }

    /// Accept connections for the lifetime of the process
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                        warn!(
                            "Max connections ({}) reached with {} logged in, rejecting {}",
                            self.max_connections,
                            self.server.online_count(),
                            addr
                        );
                        drop(stream);
                        continue;
                    };

                    info!("New connection from {}", addr);
                    let server = self.server.clone();
                    let session = self.session;

                    // The permit travels with the task and frees the slot when it ends
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, server, session).await {
                            warn!("Connection {} closed: {}", addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}
