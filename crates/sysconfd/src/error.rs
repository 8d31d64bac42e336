//! Daemon-specific error types

use libsysconf_core::CoreError;
use libsysconf_ipc::IpcError;
use thiserror::Error;

/// Errors specific to daemon operations
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Failed to bind the listening socket
    #[error("Failed to bind to socket: {0}")]
    BindFailed(String),

    /// Failed to acquire daemon lock
    #[error("Failed to acquire lock: {0}")]
    LockFailed(String),

    /// Snapshot encoding or state file error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An actor went away
    #[error("Channel error: {0}")]
    Channel(String),
}
