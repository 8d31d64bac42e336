//! Snapshot clients
//!
//! A client copies the current snapshot of one service and acknowledges
//! generations it has applied. Copies hold a reference on the shared
//! connection until they are dropped.

use std::marker::PhantomData;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use libsysconf_core::{DnsConfig, NwiState, Snapshot, SnapshotBuffer, SnapshotPayload};
use tracing::{debug, error};

use crate::connection::ConnectionHandle;
use crate::error::IpcError;
use crate::messages::IpcCommand;
use crate::resolve_endpoint;

/// Client for the DNS configuration service
pub type DnsConfigurationClient = SnapshotClient<DnsConfig>;

/// Client for the network information service
pub type NwiClient = SnapshotClient<NwiState>;

/// Copies snapshots of the service that serves `T`
pub struct SnapshotClient<T> {
    handle: ConnectionHandle,
    process_name: Option<String>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: SnapshotPayload> SnapshotClient<T> {
    /// Create a client for the daemon at `endpoint`
    pub fn new(endpoint: PathBuf) -> Result<Self, IpcError> {
        Ok(Self {
            handle: ConnectionHandle::start(T::SERVICE, endpoint)?,
            process_name: process_name(),
            _payload: PhantomData,
        })
    }

    /// Create a client for the default daemon endpoint
    pub fn with_default_endpoint() -> Result<Self, IpcError> {
        Self::new(resolve_endpoint(None))
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Copy the current snapshot.
    ///
    /// `Ok(None)` when the daemon is unreachable, has no state, or sends
    /// content this version does not understand. The only error is
    /// `IpcError::CorruptTransport`, after which the connection is discarded.
    pub fn copy(&self) -> Result<Option<ConfigSnapshot<T>>, IpcError> {
        if let Err(e) = self.handle.acquire() {
            debug!(service = %T::SERVICE, error = %e, "copy skipped");
            return Ok(None);
        }
        let lease = Lease {
            handle: self.handle.clone(),
        };

        let command = IpcCommand::Copy {
            process_name: self.process_name.clone(),
        };
        let response = match self.handle.send_request_await_reply(command) {
            Ok(response) => response,
            Err(e) => {
                debug!(service = %T::SERVICE, error = %e, "copy request failed");
                return Ok(None);
            }
        };

        let Some(raw) = response.configuration else {
            return Ok(None);
        };

        let buffer = match SnapshotBuffer::copy_from_wire(&raw) {
            Ok(buffer) => buffer,
            Err(corrupt) => {
                error!(service = %T::SERVICE, error = %corrupt, "corrupt snapshot received");
                self.handle.discard_connection();
                return Err(IpcError::CorruptTransport(corrupt));
            }
        };

        match buffer.expand::<T>() {
            Some(snapshot) => Ok(Some(ConfigSnapshot {
                snapshot,
                _lease: lease,
            })),
            None => {
                debug!(service = %T::SERVICE, "snapshot content not understood");
                Ok(None)
            }
        }
    }

    /// Tell the daemon this process has applied `snapshot`'s generation.
    ///
    /// Pins the connection open for the rest of the process lifetime.
    /// No reply is awaited.
    pub fn acknowledge(&self, snapshot: &ConfigSnapshot<T>, bundle_id: Option<&str>) {
        self.handle.pin_for_process_lifetime();
        self.handle.send(IpcCommand::Acknowledge {
            generation: snapshot.generation(),
            bundle_id: bundle_id.map(str::to_string),
        });
    }
}

/// A copied snapshot; holds the connection open until dropped
pub struct ConfigSnapshot<T> {
    snapshot: Snapshot<T>,
    _lease: Lease,
}

impl<T> ConfigSnapshot<T> {
    pub fn into_snapshot(self) -> Snapshot<T> {
        self.snapshot
    }
}

impl<T> Deref for ConfigSnapshot<T> {
    type Target = Snapshot<T>;

    fn deref(&self) -> &Snapshot<T> {
        &self.snapshot
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ConfigSnapshot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSnapshot")
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

struct Lease {
    handle: ConnectionHandle,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.handle.release();
    }
}

/// Name of the running executable, sent along with copy requests
pub fn process_name() -> Option<String> {
    let arg0 = std::env::args_os().next()?;
    Path::new(&arg0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_without_daemon_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let client = NwiClient::new(dir.path().join("absent.sock")).unwrap();

        assert!(client.copy().unwrap().is_none());
        let status = client.connection().status().unwrap();
        assert_eq!(status.refcount, 0);
    }

    #[test]
    fn test_process_name_is_basename() {
        let name = process_name().unwrap();
        assert!(!name.contains('/'));
    }
}
