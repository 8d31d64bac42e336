//! Shared connection to one sysconfd service
//!
//! Every copy in a process goes over one connection per service. The
//! connection is opened by the first acquire and torn down by the release
//! that brings the holder count back to zero.
//!
//! The socket is owned by an actor running on a dedicated thread with its
//! own current-thread runtime. Handles talk to it over a channel, so the
//! blocking calls here (`acquire`, `send_request_await_reply`, `status`)
//! must not be made from inside an async runtime. `release`, `pin` and
//! `send` never block.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use libsysconf_core::Service;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::IpcError;
use crate::framing::{read_frame, write_frame};
use crate::messages::{IpcCommand, IpcRequest, IpcResponse};
use crate::IPC_SCHEMA_VERSION;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Outstanding holders, pins included
    pub refcount: u32,
    /// Holders taken by `pin_for_process_lifetime`
    pub pinned: u32,
    /// Successful opens since start
    pub opens: u64,
    /// Teardowns since start
    pub teardowns: u64,
}

type Reply = oneshot::Sender<Result<IpcResponse, IpcError>>;
type Pending = Arc<Mutex<HashMap<u64, Reply>>>;

enum Command {
    Acquire {
        reply: oneshot::Sender<Result<(), IpcError>>,
    },
    Release,
    Pin,
    Discard,
    Request {
        command: IpcCommand,
        reply: Reply,
    },
    Send {
        command: IpcCommand,
    },
    Status {
        reply: oneshot::Sender<ConnectionStatus>,
    },
}

/// Handle to the shared connection for one service
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Command>,
    service: Service,
    owner_pid: u32,
}

impl ConnectionHandle {
    /// Spawn the connection actor. No socket is opened until the first acquire.
    pub fn start(service: Service, endpoint: PathBuf) -> Result<Self, IpcError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = ConnectionActor::new(service, endpoint, rx);

        std::thread::Builder::new()
            .name(format!("{}-conn", service.service_name()))
            .spawn(move || runtime.block_on(actor.run()))?;

        Ok(Self {
            tx,
            service,
            owner_pid: std::process::id(),
        })
    }

    pub fn service(&self) -> Service {
        self.service
    }

    // The actor thread does not survive fork(); a child must never touch it.
    fn in_forked_child(&self) -> bool {
        std::process::id() != self.owner_pid
    }

    fn unavailable(&self, why: &str) -> IpcError {
        IpcError::Unavailable(format!("{}: {}", self.service.description(), why))
    }

    /// Take a reference on the connection, opening it if needed
    pub fn acquire(&self) -> Result<(), IpcError> {
        if self.in_forked_child() {
            return Err(self.unavailable("requested between fork() and exec()"));
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Acquire { reply })
            .map_err(|_| self.unavailable("connection actor stopped"))?;
        rx.blocking_recv()
            .map_err(|_| self.unavailable("connection actor stopped"))?
    }

    /// Drop a reference; the last one closes the connection
    pub fn release(&self) {
        if self.in_forked_child() {
            return;
        }
        let _ = self.tx.send(Command::Release);
    }

    /// Take a reference that is never released
    pub fn pin_for_process_lifetime(&self) {
        if self.in_forked_child() {
            return;
        }
        let _ = self.tx.send(Command::Pin);
    }

    /// Close the socket without touching the holder count.
    /// The next acquire reconnects.
    pub fn discard_connection(&self) {
        if self.in_forked_child() {
            return;
        }
        let _ = self.tx.send(Command::Discard);
    }

    /// Send a request and wait for its reply
    pub fn send_request_await_reply(&self, command: IpcCommand) -> Result<IpcResponse, IpcError> {
        if self.in_forked_child() {
            return Err(self.unavailable("requested between fork() and exec()"));
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Request { command, reply })
            .map_err(|_| self.unavailable("connection actor stopped"))?;
        rx.blocking_recv()
            .map_err(|_| self.unavailable("connection actor stopped"))?
    }

    /// Send a message that has no reply
    pub fn send(&self, command: IpcCommand) {
        if self.in_forked_child() {
            return;
        }
        let _ = self.tx.send(Command::Send { command });
    }

    pub fn status(&self) -> Option<ConnectionStatus> {
        if self.in_forked_child() {
            return None;
        }
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Status { reply }).ok()?;
        rx.blocking_recv().ok()
    }
}

struct Link {
    writer: OwnedWriteHalf,
    pending: Pending,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Link {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

struct ConnectionActor {
    service: Service,
    endpoint: PathBuf,
    rx: mpsc::UnboundedReceiver<Command>,
    state: ConnectionState,
    link: Option<Link>,
    refcount: u32,
    pinned: u32,
    opens: u64,
    teardowns: u64,
    next_request_id: u64,
}

impl ConnectionActor {
    fn new(service: Service, endpoint: PathBuf, rx: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            service,
            endpoint,
            rx,
            state: ConnectionState::Closed,
            link: None,
            refcount: 0,
            pinned: 0,
            opens: 0,
            teardowns: 0,
            next_request_id: 1,
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Acquire { reply } => {
                    let result = self.acquire().await;
                    let _ = reply.send(result);
                }
                Command::Release => self.release(),
                Command::Pin => {
                    self.refcount += 1;
                    self.pinned += 1;
                    debug!(service = %self.service, refcount = self.refcount, "connection pinned");
                }
                Command::Discard => self.teardown("discarded"),
                Command::Request { command, reply } => self.request(command, reply).await,
                Command::Send { command } => self.send(command).await,
                Command::Status { reply } => {
                    let _ = reply.send(self.status());
                }
            }
        }
        self.teardown("all handles dropped");
    }

    fn link_alive(&self) -> bool {
        self.link.as_ref().is_some_and(Link::is_alive)
    }

    async fn acquire(&mut self) -> Result<(), IpcError> {
        if self.link_alive() {
            self.refcount += 1;
            return Ok(());
        }
        if self.link.is_some() {
            self.teardown("peer went away");
        }

        self.state = ConnectionState::Connecting;
        match self.connect().await {
            Ok(link) => {
                self.link = Some(link);
                self.state = ConnectionState::Open;
                self.opens += 1;
                self.refcount += 1;
                info!(service = %self.service, endpoint = %self.endpoint.display(), "connection opened");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                debug!(service = %self.service, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<Link, IpcError> {
        let stream = UnixStream::connect(&self.endpoint).await.map_err(|e| {
            IpcError::Unavailable(format!(
                "{} at {}: {}",
                self.service.description(),
                self.endpoint.display(),
                e
            ))
        })?;
        let (read_half, writer) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_replies(
            read_half,
            pending.clone(),
            alive.clone(),
            self.service,
        ));
        Ok(Link {
            writer,
            pending,
            alive,
            reader,
        })
    }

    fn release(&mut self) {
        if self.refcount <= self.pinned {
            warn!(
                service = %self.service,
                refcount = self.refcount,
                pinned = self.pinned,
                "release without matching acquire"
            );
            return;
        }
        self.refcount -= 1;
        if self.refcount == 0 {
            self.teardown("last holder released");
        }
    }

    fn teardown(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            link.reader.abort();
            link.alive.store(false, Ordering::SeqCst);
            fail_pending(&link.pending, self.service);
            self.teardowns += 1;
            info!(service = %self.service, reason, "connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    async fn request(&mut self, command: IpcCommand, reply: Reply) {
        if !self.link_alive() {
            let _ = reply.send(Err(IpcError::Unavailable(format!(
                "{}: not connected",
                self.service.description()
            ))));
            return;
        }

        let request_id = self.next_id();
        let bytes = match IpcRequest::new(request_id, self.service, command).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let Some(link) = self.link.as_mut() else {
            return;
        };
        lock_pending(&link.pending).insert(request_id, reply);
        if let Err(e) = write_frame(&mut link.writer, &bytes).await {
            warn!(service = %self.service, error = %e, "request write failed");
            link.alive.store(false, Ordering::SeqCst);
            if let Some(reply) = lock_pending(&link.pending).remove(&request_id) {
                let _ = reply.send(Err(IpcError::Unavailable(e.to_string())));
            }
        }
    }

    async fn send(&mut self, command: IpcCommand) {
        if !self.link_alive() {
            debug!(service = %self.service, "dropping message, not connected");
            return;
        }
        let request_id = self.next_id();
        let bytes = match IpcRequest::new(request_id, self.service, command).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(service = %self.service, error = %e, "failed to encode message");
                return;
            }
        };
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = write_frame(&mut link.writer, &bytes).await {
                debug!(service = %self.service, error = %e, "message write failed");
                link.alive.store(false, Ordering::SeqCst);
            }
        }
    }

    fn status(&self) -> ConnectionStatus {
        let state = if self.link_alive() {
            ConnectionState::Open
        } else if self.state == ConnectionState::Connecting {
            ConnectionState::Connecting
        } else {
            ConnectionState::Closed
        };
        ConnectionStatus {
            state,
            refcount: self.refcount,
            pinned: self.pinned,
            opens: self.opens,
            teardowns: self.teardowns,
        }
    }
}

async fn read_replies(
    mut reader: OwnedReadHalf,
    pending: Pending,
    alive: Arc<AtomicBool>,
    service: Service,
) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(service = %service, "peer closed connection");
                break;
            }
            Err(e) => {
                warn!(service = %service, error = %e, "failed to read reply");
                break;
            }
        };

        let response = match IpcResponse::decode(&frame) {
            Ok(response) => response,
            Err(e) => {
                warn!(service = %service, error = %e, "undecodable reply");
                break;
            }
        };

        let Some(reply) = lock_pending(&pending).remove(&response.request_id) else {
            debug!(service = %service, request_id = response.request_id, "unsolicited reply");
            continue;
        };

        let result = if response.ipc_schema_version == IPC_SCHEMA_VERSION {
            Ok(response)
        } else {
            Err(IpcError::VersionMismatch {
                expected: IPC_SCHEMA_VERSION,
                actual: response.ipc_schema_version,
            })
        };
        let _ = reply.send(result);
    }

    alive.store(false, Ordering::SeqCst);
    fail_pending(&pending, service);
}

fn lock_pending(pending: &Pending) -> MutexGuard<'_, HashMap<u64, Reply>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fail_pending(pending: &Pending, service: Service) {
    for (_, reply) in lock_pending(pending).drain() {
        let _ = reply.send(Err(IpcError::Unavailable(format!(
            "{}: connection closed",
            service.description()
        ))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_endpoint() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        (dir, path)
    }

    #[test]
    fn test_acquire_failure_leaves_refcount_unchanged() {
        let (_dir, path) = missing_endpoint();
        let handle = ConnectionHandle::start(Service::DnsConfiguration, path).unwrap();

        assert!(matches!(handle.acquire(), Err(IpcError::Unavailable(_))));
        let status = handle.status().unwrap();
        assert_eq!(status.state, ConnectionState::Closed);
        assert_eq!(status.refcount, 0);
        assert_eq!(status.opens, 0);
    }

    #[test]
    fn test_release_at_zero_is_ignored() {
        let (_dir, path) = missing_endpoint();
        let handle = ConnectionHandle::start(Service::NetworkInformation, path).unwrap();

        handle.release();
        handle.release();
        let status = handle.status().unwrap();
        assert_eq!(status.refcount, 0);
        assert_eq!(status.teardowns, 0);
    }

    #[test]
    fn test_request_without_connection_is_unavailable() {
        let (_dir, path) = missing_endpoint();
        let handle = ConnectionHandle::start(Service::NetworkInformation, path).unwrap();

        let result = handle.send_request_await_reply(IpcCommand::Copy { process_name: None });
        assert!(matches!(result, Err(IpcError::Unavailable(_))));
    }

    #[test]
    fn test_pin_counts_as_holder() {
        let (_dir, path) = missing_endpoint();
        let handle = ConnectionHandle::start(Service::DnsConfiguration, path).unwrap();

        handle.pin_for_process_lifetime();
        let status = handle.status().unwrap();
        assert_eq!(status.refcount, 1);
        assert_eq!(status.pinned, 1);
    }

    #[test]
    fn test_forked_child_is_refused() {
        let (_dir, path) = missing_endpoint();
        let handle = ConnectionHandle::start(Service::DnsConfiguration, path).unwrap();

        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            // The actor thread does not exist here; only the pid check may answer
            let refused = matches!(handle.acquire(), Err(IpcError::Unavailable(_)));
            handle.release();
            handle.pin_for_process_lifetime();
            unsafe { libc::_exit(if refused { 0 } else { 1 }) };
        }

        let mut status = 0;
        let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
        assert_eq!(waited, pid);
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 0);

        let status = handle.status().unwrap();
        assert_eq!(status.refcount, 0);
        assert_eq!(status.pinned, 0);
    }

    #[test]
    fn test_stray_release_keeps_pinned_link_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer.sock");
        // connect() completes against the backlog; nothing needs to accept
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let handle = ConnectionHandle::start(Service::NetworkInformation, path).unwrap();

        handle.acquire().unwrap();
        handle.pin_for_process_lifetime();
        handle.release();
        handle.release();
        handle.release();

        let status = handle.status().unwrap();
        assert_eq!(status.state, ConnectionState::Open);
        assert_eq!(status.refcount, 1);
        assert_eq!(status.pinned, 1);
        assert_eq!(status.teardowns, 0);
    }
}
