//! IPC error types

use libsysconf_core::CorruptSnapshot;
use thiserror::Error;

/// Errors that can occur during IPC operations
#[derive(Error, Debug)]
pub enum IpcError {
    /// Service endpoint not reachable, or called where connecting is not allowed
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A snapshot failed size validation; its bytes must not be used
    #[error("Corrupt snapshot transport: {0}")]
    CorruptTransport(#[from] CorruptSnapshot),

    /// Frame larger than the protocol allows
    #[error("Frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    /// Lock file error
    #[error("Lock file error: {0}")]
    LockFile(String),

    /// Lock is held by another process
    #[error("Lock held by process {pid} (expires in {expires_in_ms}ms)")]
    LockHeld { pid: u32, expires_in_ms: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IpcError {
    /// Whether this error means the data path can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(self, IpcError::CorruptTransport(_))
    }
}
