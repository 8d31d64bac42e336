//! Unix socket server
//!
//! Each accepted connection becomes one session. Frames on a connection
//! are handled in order; a reply, when there is one, is written before
//! the next frame is read.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsysconf_ipc::framing::{read_frame, write_frame};
use libsysconf_ipc::IpcRequest;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::DaemonError;
use crate::handlers::handle_request;
use crate::session::{Credentials, SessionHandle};
use crate::store::ConfigStore;

/// Listening socket plus what connections need to serve requests
pub struct Server {
    listener: UnixListener,
    path: PathBuf,
    store: Arc<ConfigStore>,
    sessions: SessionHandle,
}

impl Server {
    /// Bind the socket at `path`.
    ///
    /// A leftover socket file is replaced unless a daemon still answers on it.
    pub async fn bind(
        path: &Path,
        store: Arc<ConfigStore>,
        sessions: SessionHandle,
    ) -> Result<Self, DaemonError> {
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(DaemonError::BindFailed(format!(
                    "{} is in use by another daemon",
                    path.display()
                )));
            }
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| DaemonError::BindFailed(format!("{}: {}", path.display(), e)))?;
        // Clients run unprivileged
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;

        info!(socket = %path.display(), "listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            store,
            sessions,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until shutdown, then remove the socket file
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("server shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(serve_connection(
                                stream,
                                self.store.clone(),
                                self.sessions.clone(),
                                shutdown.resubscribe(),
                            ));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(error = %e, "failed to remove socket file");
        }
        Ok(())
    }
}

async fn serve_connection(
    mut stream: UnixStream,
    store: Arc<ConfigStore>,
    sessions: SessionHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    let credentials = match stream.peer_cred() {
        Ok(cred) => Credentials {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid(),
        },
        Err(e) => {
            warn!(error = %e, "failed to read peer credentials");
            return;
        }
    };

    let key = match sessions.open(credentials).await {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "failed to open session");
            return;
        }
    };

    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => break,
            frame = read_frame(&mut stream) => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(session = %key, error = %e, "failed to read request");
                break;
            }
        };

        let request = match IpcRequest::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(session = %key, error = %e, "undecodable request");
                break;
            }
        };

        let response = match handle_request(request, key, &sessions, &store).await {
            Ok(response) => response,
            Err(e) => {
                error!(session = %key, error = %e, "request failed");
                break;
            }
        };

        if let Some(response) = response {
            let written = match response.encode() {
                Ok(bytes) => write_frame(&mut stream, &bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!(session = %key, error = %e, "failed to send reply");
                break;
            }
        }
    }

    if let Err(e) = sessions.close(key).await {
        debug!(session = %key, error = %e, "session close after manager stopped");
    }
}
