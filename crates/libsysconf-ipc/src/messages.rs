//! IPC request and response message types
//!
//! These types define the wire format for daemon communication.
//! Each frame carries one rkyv-serialized message.

use libsysconf_core::Service;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::IpcError;
use crate::IPC_SCHEMA_VERSION;

/// IPC request envelope
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct IpcRequest {
    /// Schema version for compatibility checking
    pub ipc_schema_version: u32,
    /// Per-connection request ID for correlating replies
    pub request_id: u64,
    /// Target service (see `Service::kind`)
    pub service: u32,
    /// The command to execute
    pub command: IpcCommand,
}

impl IpcRequest {
    /// Create a new request with the current schema version
    pub fn new(request_id: u64, service: Service, command: IpcCommand) -> Self {
        Self {
            ipc_schema_version: IPC_SCHEMA_VERSION,
            request_id,
            service: service.kind(),
            command,
        }
    }

    pub fn service(&self) -> Option<Service> {
        Service::from_kind(self.service)
    }

    pub fn encode(&self) -> Result<AlignedVec, IpcError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self).map_err(|e| IpcError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IpcError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned(bytes))
            .map_err(|e| IpcError::Deserialization(e.to_string()))
    }
}

/// IPC response envelope
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct IpcResponse {
    /// Schema version (must match request)
    pub ipc_schema_version: u32,
    /// Request ID for correlation
    pub request_id: u64,
    /// Snapshot buffer, absent when the daemon has no state
    pub configuration: Option<Vec<u8>>,
}

impl IpcResponse {
    /// A reply carrying a snapshot buffer
    pub fn configuration(request_id: u64, bytes: Vec<u8>) -> Self {
        Self {
            ipc_schema_version: IPC_SCHEMA_VERSION,
            request_id,
            configuration: Some(bytes),
        }
    }

    /// A reply with no state available
    pub fn empty(request_id: u64) -> Self {
        Self {
            ipc_schema_version: IPC_SCHEMA_VERSION,
            request_id,
            configuration: None,
        }
    }

    pub fn encode(&self) -> Result<AlignedVec, IpcError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self).map_err(|e| IpcError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IpcError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned(bytes))
            .map_err(|e| IpcError::Deserialization(e.to_string()))
    }
}

/// Commands a client can send
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub enum IpcCommand {
    /// Copy the current snapshot; always answered
    Copy {
        /// Requesting process, for diagnostics
        process_name: Option<String>,
    },
    /// Acknowledge a generation; never answered
    Acknowledge {
        generation: u64,
        /// Requesting bundle or component, for diagnostics
        bundle_id: Option<String>,
    },
}

impl IpcCommand {
    pub fn expects_reply(&self) -> bool {
        matches!(self, IpcCommand::Copy { .. })
    }
}

// Frames arrive in plain byte buffers; archived data must be aligned before access.
fn aligned(bytes: &[u8]) -> AlignedVec {
    let mut buf = AlignedVec::with_capacity(bytes.len());
    buf.extend_from_slice(bytes);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let req = IpcRequest::new(
            7,
            Service::NetworkInformation,
            IpcCommand::Copy {
                process_name: Some("resolver".to_string()),
            },
        );
        assert_eq!(req.ipc_schema_version, IPC_SCHEMA_VERSION);
        assert_eq!(req.service(), Some(Service::NetworkInformation));
        assert!(req.command.expects_reply());
    }

    #[test]
    fn test_acknowledge_expects_no_reply() {
        let cmd = IpcCommand::Acknowledge {
            generation: 3,
            bundle_id: None,
        };
        assert!(!cmd.expects_reply());
    }

    #[test]
    fn test_request_decode_from_unaligned_slice() {
        let req = IpcRequest::new(
            42,
            Service::DnsConfiguration,
            IpcCommand::Acknowledge {
                generation: 9,
                bundle_id: Some("com.example.app".to_string()),
            },
        );
        let bytes = req.encode().unwrap();

        // Shift by one byte so the archive is not at an aligned address
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let decoded = IpcRequest::decode(&shifted[1..]).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_response_with_and_without_configuration() {
        let full = IpcResponse::configuration(1, vec![1, 2, 3]);
        let decoded = IpcResponse::decode(&full.encode().unwrap()).unwrap();
        assert_eq!(decoded.configuration, Some(vec![1, 2, 3]));

        let empty = IpcResponse::empty(2);
        let decoded = IpcResponse::decode(&empty.encode().unwrap()).unwrap();
        assert_eq!(decoded.request_id, 2);
        assert!(decoded.configuration.is_none());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            IpcResponse::decode(&[0xFF; 3]),
            Err(IpcError::Deserialization(_))
        ));
    }
}
