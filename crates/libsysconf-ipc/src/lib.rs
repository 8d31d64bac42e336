//! IPC types and client for sysconfd snapshot distribution
//!
//! This crate provides:
//! - Message types for daemon communication (IpcRequest, IpcResponse, IpcCommand)
//! - Length-prefixed framing over Unix sockets
//! - The shared, reference-counted connection to a service (ConnectionHandle)
//! - Snapshot clients for DNS configuration and network information
//! - Daemon lock management (DaemonLock)
//! - In-process change notifications

pub mod client;
pub mod connection;
pub mod error;
pub mod framing;
pub mod lock;
pub mod messages;
pub mod notifications;

use std::path::{Path, PathBuf};

pub use client::{ConfigSnapshot, DnsConfigurationClient, NwiClient, SnapshotClient};
pub use connection::{ConnectionHandle, ConnectionState, ConnectionStatus};
pub use error::IpcError;
pub use lock::DaemonLock;
pub use messages::{IpcCommand, IpcRequest, IpcResponse};
pub use notifications::Notification;

/// Current IPC schema version
pub const IPC_SCHEMA_VERSION: u32 = 1;

/// Default lease duration for the daemon lock in milliseconds
pub const DEFAULT_LEASE_MS: u64 = 30_000;

/// Socket the system daemon listens on
pub const SYSTEM_SOCKET_PATH: &str = "/var/run/sysconfd.sock";

/// Environment variable overriding the socket path (debug builds only)
pub const SOCKET_ENV: &str = "SYSCONFD_SOCKET";

/// Resolve the daemon endpoint.
///
/// An explicit path wins. Debug builds then honour `SYSCONFD_SOCKET`.
/// Everything else uses the system socket.
pub fn resolve_endpoint(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    #[cfg(debug_assertions)]
    if let Some(path) = std::env::var_os(SOCKET_ENV) {
        return PathBuf::from(path);
    }

    PathBuf::from(SYSTEM_SOCKET_PATH)
}
