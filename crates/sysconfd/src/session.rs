//! Client sessions
//!
//! One session per open connection. The registry is owned by the
//! `SessionManager` actor; every create, remove and acknowledgement goes
//! through its channel, so operations on a key never interleave.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use libsysconf_core::Service;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DaemonError;
use crate::store::{AckOutcome, ConfigStore};

/// Identifies one client connection for as long as it is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(pub u64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Identity of the process that opened a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

/// Server-side state for one connection
pub struct Session {
    key: SessionKey,
    credentials: Credentials,
    store: Arc<ConfigStore>,
    acknowledged: HashMap<Service, u64>,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Captured when the session was created, never refreshed
    pub fn credentials(&self) -> Credentials {
        self.credentials
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn last_acknowledged(&self, service: Service) -> Option<u64> {
        self.acknowledged.get(&service).copied()
    }

    fn record_ack(&mut self, service: Service, generation: u64) {
        self.acknowledged.insert(service, generation);
    }

    pub fn info(&self) -> SessionInfo {
        let mut acknowledged: Vec<(Service, u64)> =
            self.acknowledged.iter().map(|(s, g)| (*s, *g)).collect();
        acknowledged.sort();
        SessionInfo {
            key: self.key,
            credentials: self.credentials,
            acknowledged,
        }
    }
}

/// Read-only copy of a session, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub credentials: Credentials,
    /// Last acknowledged generation per service
    pub acknowledged: Vec<(Service, u64)>,
}

/// Sessions by key
#[derive(Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionKey, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: SessionKey) -> Option<&Session> {
        self.sessions.get(&key)
    }

    pub fn lookup_mut(&mut self, key: SessionKey) -> Option<&mut Session> {
        self.sessions.get_mut(&key)
    }

    /// Create the session for `key`.
    ///
    /// An existing session is returned unchanged; its credentials are the
    /// ones captured when it was first created.
    pub fn create(
        &mut self,
        key: SessionKey,
        credentials: Credentials,
        store: Arc<ConfigStore>,
    ) -> &Session {
        self.sessions.entry(key).or_insert_with(|| Session {
            key,
            credentials,
            store,
            acknowledged: HashMap::new(),
        })
    }

    pub fn remove(&mut self, key: SessionKey) -> Option<Session> {
        self.sessions.remove(&key)
    }

    /// Visit every session in key order
    pub fn for_each(&self, mut visitor: impl FnMut(&Session)) {
        for session in self.sessions.values() {
            visitor(session);
        }
    }

    /// Remove every session, returning their keys
    pub fn cleanup(&mut self) -> Vec<SessionKey> {
        std::mem::take(&mut self.sessions).into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Message sent to the session manager
pub enum SessionMessage {
    /// A connection was accepted
    Open {
        credentials: Credentials,
        reply: oneshot::Sender<SessionKey>,
    },
    /// A connection closed
    Close {
        key: SessionKey,
        reply: oneshot::Sender<bool>,
    },
    Lookup {
        key: SessionKey,
        reply: oneshot::Sender<Option<SessionInfo>>,
    },
    Acknowledge {
        key: SessionKey,
        service: Service,
        generation: u64,
        reply: oneshot::Sender<AckOutcome>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    /// Remove every session (shutdown)
    Cleanup {
        reply: oneshot::Sender<usize>,
    },
}

/// Owns the registry and applies messages one at a time
pub struct SessionManager {
    registry: SessionRegistry,
    store: Arc<ConfigStore>,
    rx: mpsc::Receiver<SessionMessage>,
    next_key: u64,
}

impl SessionManager {
    /// Spawn the manager on the current runtime
    pub fn spawn(store: Arc<ConfigStore>) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let manager = SessionManager {
            registry: SessionRegistry::new(),
            store,
            rx,
            next_key: 1,
        };
        let task = tokio::spawn(manager.run());
        (SessionHandle { tx }, task)
    }

    async fn run(mut self) {
        debug!("session manager started");
        while let Some(msg) = self.rx.recv().await {
            match msg {
                SessionMessage::Open { credentials, reply } => {
                    let key = SessionKey(self.next_key);
                    self.next_key += 1;
                    self.registry.create(key, credentials, self.store.clone());
                    debug!(session = %key, uid = credentials.uid, gid = credentials.gid, "session opened");
                    let _ = reply.send(key);
                }
                SessionMessage::Close { key, reply } => {
                    let removed = self.registry.remove(key).is_some();
                    if removed {
                        self.store.forget_session(key).await;
                        debug!(session = %key, "session closed");
                    }
                    let _ = reply.send(removed);
                }
                SessionMessage::Lookup { key, reply } => {
                    let _ = reply.send(self.registry.lookup(key).map(Session::info));
                }
                SessionMessage::Acknowledge {
                    key,
                    service,
                    generation,
                    reply,
                } => {
                    let outcome = self.acknowledge(key, service, generation).await;
                    let _ = reply.send(outcome);
                }
                SessionMessage::List { reply } => {
                    let mut infos = Vec::with_capacity(self.registry.len());
                    self.registry.for_each(|s| infos.push(s.info()));
                    let _ = reply.send(infos);
                }
                SessionMessage::Cleanup { reply } => {
                    let keys = self.registry.cleanup();
                    for key in &keys {
                        self.store.forget_session(*key).await;
                    }
                    info!(count = keys.len(), "sessions cleaned up");
                    let _ = reply.send(keys.len());
                }
            }
        }
        debug!("session manager stopped");
    }

    async fn acknowledge(&mut self, key: SessionKey, service: Service, generation: u64) -> AckOutcome {
        let Some(session) = self.registry.lookup_mut(key) else {
            warn!(session = %key, "acknowledgement for unknown session");
            return AckOutcome::Unknown;
        };

        let outcome = session.store().acknowledge(service, key, generation).await;
        match outcome {
            AckOutcome::Recorded | AckOutcome::Duplicate => session.record_ack(service, generation),
            AckOutcome::Stale { .. } => {}
            AckOutcome::Unknown => {
                warn!(session = %key, service = %service, generation, "acknowledged generation was never published");
            }
        }
        outcome
    }
}

/// Handle for talking to the session manager
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionMessage>,
}

impl SessionHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionMessage) -> Result<T, DaemonError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| DaemonError::Channel("session manager stopped".to_string()))?;
        rx.await
            .map_err(|_| DaemonError::Channel("session manager dropped reply".to_string()))
    }

    pub async fn open(&self, credentials: Credentials) -> Result<SessionKey, DaemonError> {
        self.call(|reply| SessionMessage::Open { credentials, reply }).await
    }

    /// Returns whether a session was removed
    pub async fn close(&self, key: SessionKey) -> Result<bool, DaemonError> {
        self.call(|reply| SessionMessage::Close { key, reply }).await
    }

    pub async fn lookup(&self, key: SessionKey) -> Result<Option<SessionInfo>, DaemonError> {
        self.call(|reply| SessionMessage::Lookup { key, reply }).await
    }

    pub async fn acknowledge(
        &self,
        key: SessionKey,
        service: Service,
        generation: u64,
    ) -> Result<AckOutcome, DaemonError> {
        self.call(|reply| SessionMessage::Acknowledge {
            key,
            service,
            generation,
            reply,
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<SessionInfo>, DaemonError> {
        self.call(|reply| SessionMessage::List { reply }).await
    }

    /// Remove every session; returns how many there were
    pub async fn cleanup(&self) -> Result<usize, DaemonError> {
        self.call(|reply| SessionMessage::Cleanup { reply }).await
    }
}
