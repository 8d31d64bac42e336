//! Request handlers
//!
//! Copy is answered with the current snapshot bytes. Acknowledge is
//! applied through the session manager and never answered.

use libsysconf_ipc::{IpcCommand, IpcRequest, IpcResponse, IPC_SCHEMA_VERSION};
use tracing::{debug, warn};

use crate::error::DaemonError;
use crate::session::{SessionHandle, SessionKey};
use crate::store::ConfigStore;

/// Handle one request from `session`; `None` means no reply is sent
pub async fn handle_request(
    request: IpcRequest,
    session: SessionKey,
    sessions: &SessionHandle,
    store: &ConfigStore,
) -> Result<Option<IpcResponse>, DaemonError> {
    let request_id = request.request_id;
    let expects_reply = request.command.expects_reply();

    if request.ipc_schema_version != IPC_SCHEMA_VERSION {
        warn!(
            session = %session,
            expected = IPC_SCHEMA_VERSION,
            actual = request.ipc_schema_version,
            "schema version mismatch"
        );
        return Ok(expects_reply.then(|| IpcResponse::empty(request_id)));
    }

    let Some(service) = request.service() else {
        warn!(session = %session, kind = request.service, "request for unknown service");
        return Ok(expects_reply.then(|| IpcResponse::empty(request_id)));
    };

    match request.command {
        IpcCommand::Copy { process_name } => {
            if sessions.lookup(session).await?.is_none() {
                warn!(session = %session, "copy on a closed session");
                return Ok(Some(IpcResponse::empty(request_id)));
            }

            let response = match store.current(service).await {
                Some((generation, bytes)) => {
                    debug!(
                        session = %session,
                        service = %service,
                        generation,
                        process = process_name.as_deref().unwrap_or("-"),
                        "copy"
                    );
                    IpcResponse::configuration(request_id, bytes.to_vec())
                }
                None => {
                    debug!(session = %session, service = %service, "copy with no state");
                    IpcResponse::empty(request_id)
                }
            };
            Ok(Some(response))
        }
        IpcCommand::Acknowledge {
            generation,
            bundle_id,
        } => {
            let outcome = sessions.acknowledge(session, service, generation).await?;
            debug!(
                session = %session,
                service = %service,
                generation,
                bundle = bundle_id.as_deref().unwrap_or("-"),
                ?outcome,
                "acknowledge"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use libsysconf_core::nwi::{AddressFamily, IfStateFlags, NwiState};
    use libsysconf_core::Service;

    use super::*;
    use crate::session::{Credentials, SessionManager};

    const USER: Credentials = Credentials {
        uid: 501,
        gid: 20,
        pid: None,
    };

    fn copy_request(id: u64) -> IpcRequest {
        IpcRequest::new(id, Service::NetworkInformation, IpcCommand::Copy { process_name: None })
    }

    #[tokio::test]
    async fn test_copy_without_state_is_empty() {
        let store = Arc::new(ConfigStore::new());
        let (sessions, _task) = SessionManager::spawn(store.clone());
        let key = sessions.open(USER).await.unwrap();

        let response = handle_request(copy_request(3), key, &sessions, &store)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.request_id, 3);
        assert!(response.configuration.is_none());
    }

    #[tokio::test]
    async fn test_copy_returns_current_bytes_and_leaves_session_alone() {
        let store = Arc::new(ConfigStore::new());
        let (sessions, _task) = SessionManager::spawn(store.clone());
        let key = sessions.open(USER).await.unwrap();
        let state = NwiState::builder()
            .add(AddressFamily::Inet, "en0", IfStateFlags::HAS_DNS)
            .build();
        store.publish(&state).await.unwrap();
        let before = sessions.lookup(key).await.unwrap();

        let response = handle_request(copy_request(1), key, &sessions, &store)
            .await
            .unwrap()
            .unwrap();
        let (_, expected) = store.current(Service::NetworkInformation).await.unwrap();
        assert_eq!(response.configuration.as_deref(), Some(expected.as_slice()));
        assert_eq!(sessions.lookup(key).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_acknowledge_has_no_reply() {
        let store = Arc::new(ConfigStore::new());
        let (sessions, _task) = SessionManager::spawn(store.clone());
        let key = sessions.open(USER).await.unwrap();

        let request = IpcRequest::new(
            2,
            Service::NetworkInformation,
            IpcCommand::Acknowledge {
                generation: 1,
                bundle_id: None,
            },
        );
        assert!(handle_request(request, key, &sessions, &store)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch_gets_empty_reply() {
        let store = Arc::new(ConfigStore::new());
        let (sessions, _task) = SessionManager::spawn(store.clone());
        let key = sessions.open(USER).await.unwrap();

        let mut request = copy_request(5);
        request.ipc_schema_version = IPC_SCHEMA_VERSION + 1;
        let response = handle_request(request, key, &sessions, &store)
            .await
            .unwrap()
            .unwrap();
        assert!(response.configuration.is_none());
    }

    #[tokio::test]
    async fn test_unknown_service_gets_empty_reply() {
        let store = Arc::new(ConfigStore::new());
        let (sessions, _task) = SessionManager::spawn(store.clone());
        let key = sessions.open(USER).await.unwrap();

        let mut request = copy_request(6);
        request.service = 77;
        let response = handle_request(request, key, &sessions, &store)
            .await
            .unwrap()
            .unwrap();
        assert!(response.configuration.is_none());
    }
}
