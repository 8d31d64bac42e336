//! sysconfd - serves DNS configuration and network information snapshots
//!
//! The daemon provides:
//! - A config store holding the current snapshot per service
//! - Session tracking for every connected client
//! - Copy and acknowledge handling over a Unix socket
//! - Change notifications on every publish

pub mod error;
pub mod handlers;
pub mod server;
pub mod session;
pub mod store;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

pub use error::DaemonError;
pub use server::Server;
pub use session::{Credentials, SessionHandle, SessionInfo, SessionKey, SessionManager};
pub use store::{AckOutcome, ConfigStore, ServiceStatus};

/// A bound daemon: store, session manager and listening socket
pub struct Daemon {
    store: Arc<ConfigStore>,
    sessions: SessionHandle,
    manager: JoinHandle<()>,
    server: Server,
}

impl Daemon {
    /// Create the store, start the session manager and bind `socket`
    pub async fn bind(socket: &Path) -> Result<Self, DaemonError> {
        let store = Arc::new(ConfigStore::new());
        let (sessions, manager) = SessionManager::spawn(store.clone());
        let server = match Server::bind(socket, store.clone(), sessions.clone()).await {
            Ok(server) => server,
            Err(e) => {
                manager.abort();
                return Err(e);
            }
        };
        Ok(Self {
            store,
            sessions,
            manager,
            server,
        })
    }

    pub fn store(&self) -> Arc<ConfigStore> {
        self.store.clone()
    }

    pub fn sessions(&self) -> SessionHandle {
        self.sessions.clone()
    }

    pub fn socket_path(&self) -> &Path {
        self.server.path()
    }

    /// Serve until `shutdown` fires, then drop every session
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        self.server.run(shutdown).await?;

        let closed = self.sessions.cleanup().await?;
        info!(sessions = closed, "daemon stopped");
        self.manager.abort();
        Ok(())
    }
}
