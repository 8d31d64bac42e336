//! Published configuration state
//!
//! Holds the current snapshot of each service and the generation counter
//! shared by all of them. Every publish replaces a service's snapshot
//! wholesale and announces the new generation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use libsysconf_core::config::StateFile;
use libsysconf_core::snapshot::encode;
use libsysconf_core::{Service, SnapshotPayload};
use libsysconf_ipc::Notification;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::error::DaemonError;
use crate::session::SessionKey;

/// What happened to an acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First acknowledgement of the current generation by this session
    Recorded,
    /// This session had already acknowledged the current generation
    Duplicate,
    /// The generation has been superseded; nothing changes
    Stale { current: u64 },
    /// The generation was never published for this service
    Unknown,
}

/// Diagnostics for one published service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub service: Service,
    pub generation: u64,
    /// Encoded snapshot size in bytes
    pub size: usize,
    /// Sessions that acknowledged the current generation
    pub acknowledged: usize,
}

struct Published {
    generation: u64,
    bytes: Arc<Vec<u8>>,
    acknowledged: HashSet<SessionKey>,
}

#[derive(Default)]
struct StoreInner {
    generation: u64,
    published: HashMap<Service, Published>,
    /// Every generation each service has been published under
    history: HashMap<Service, BTreeSet<u64>>,
}

/// In-memory store of the current snapshots
pub struct ConfigStore {
    inner: RwLock<StoreInner>,
    notify_tx: broadcast::Sender<Notification>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            inner: RwLock::new(StoreInner::default()),
            notify_tx,
        }
    }

    /// Change notifications, for an external delivery facility
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    /// Publish a new snapshot of `T`'s service, returning its generation
    pub async fn publish<T: SnapshotPayload>(&self, payload: &T) -> Result<u64, DaemonError> {
        let service = T::SERVICE;
        let mut inner = self.inner.write().await;
        let generation = inner.generation + 1;
        let bytes = encode(generation, payload)?;
        let size = bytes.len();

        inner.generation = generation;
        inner.history.entry(service).or_default().insert(generation);
        inner.published.insert(
            service,
            Published {
                generation,
                bytes: Arc::new(bytes),
                acknowledged: HashSet::new(),
            },
        );
        drop(inner);

        info!(service = %service, generation, size, "published snapshot");
        self.announce(Notification::configuration_changed(service, generation));
        Ok(generation)
    }

    /// Remove a service's state. Returns the new generation if there was any.
    pub async fn withdraw(&self, service: Service) -> Option<u64> {
        let mut inner = self.inner.write().await;
        inner.published.remove(&service)?;
        inner.generation += 1;
        let generation = inner.generation;
        drop(inner);

        info!(service = %service, generation, "withdrew snapshot");
        self.announce(Notification::configuration_changed(service, generation));
        Some(generation)
    }

    /// Publish everything a state file describes and withdraw what it omits
    pub async fn apply_state(&self, state: &StateFile) -> Result<(), DaemonError> {
        match state.dns_config() {
            Some(dns) => {
                self.publish(&dns).await?;
            }
            None => {
                self.withdraw(Service::DnsConfiguration).await;
            }
        }
        match state.nwi_state() {
            Some(nwi) => {
                self.publish(&nwi).await?;
            }
            None => {
                self.withdraw(Service::NetworkInformation).await;
            }
        }
        Ok(())
    }

    /// The current snapshot bytes and generation for a service
    pub async fn current(&self, service: Service) -> Option<(u64, Arc<Vec<u8>>)> {
        let inner = self.inner.read().await;
        inner
            .published
            .get(&service)
            .map(|p| (p.generation, p.bytes.clone()))
    }

    /// Latest generation handed out by this daemon instance
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    pub async fn acknowledge(&self, service: Service, key: SessionKey, generation: u64) -> AckOutcome {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(published) = inner.published.get_mut(&service) else {
            return AckOutcome::Unknown;
        };
        let was_published = inner
            .history
            .get(&service)
            .is_some_and(|history| history.contains(&generation));

        if generation == published.generation {
            if published.acknowledged.insert(key) {
                AckOutcome::Recorded
            } else {
                AckOutcome::Duplicate
            }
        } else if was_published {
            debug!(service = %service, generation, current = published.generation, "stale acknowledgement");
            AckOutcome::Stale {
                current: published.generation,
            }
        } else {
            AckOutcome::Unknown
        }
    }

    /// Drop a closed session from the acknowledgement bookkeeping
    pub async fn forget_session(&self, key: SessionKey) {
        let mut inner = self.inner.write().await;
        for published in inner.published.values_mut() {
            published.acknowledged.remove(&key);
        }
    }

    pub async fn status(&self) -> Vec<ServiceStatus> {
        let inner = self.inner.read().await;
        Service::ALL
            .iter()
            .filter_map(|service| {
                inner.published.get(service).map(|p| ServiceStatus {
                    service: *service,
                    generation: p.generation,
                    size: p.bytes.len(),
                    acknowledged: p.acknowledged.len(),
                })
            })
            .collect()
    }

    pub fn announce(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.notify_tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsysconf_core::nwi::{AddressFamily, IfStateFlags, NwiState};
    use libsysconf_core::snapshot::validate;
    use libsysconf_core::{DnsConfig, DnsResolver};

    fn nwi(names: &[&str]) -> NwiState {
        let mut builder = NwiState::builder();
        for name in names {
            builder = builder.add(AddressFamily::Inet, *name, IfStateFlags::HAS_DNS);
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_generations_increase_across_services() {
        let store = ConfigStore::new();
        let g1 = store.publish(&nwi(&["en0"])).await.unwrap();
        let dns = DnsConfig {
            resolvers: vec![DnsResolver::with_nameservers(vec!["192.0.2.1".parse().unwrap()])],
            scoped_resolvers: vec![],
        };
        let g2 = store.publish(&dns).await.unwrap();
        let g3 = store.publish(&nwi(&["en0", "en1"])).await.unwrap();

        assert_eq!((g1, g2, g3), (1, 2, 3));
        let (generation, bytes) = store.current(Service::NetworkInformation).await.unwrap();
        assert_eq!(generation, 3);
        assert_eq!(validate(&bytes).unwrap().generation, 3);
    }

    #[tokio::test]
    async fn test_publish_announces_change() {
        let store = ConfigStore::new();
        let mut rx = store.subscribe();
        store.publish(&nwi(&["en0"])).await.unwrap();

        let notification = rx.recv().await.unwrap();
        assert_eq!(
            notification,
            Notification::configuration_changed(Service::NetworkInformation, 1)
        );
    }

    #[tokio::test]
    async fn test_acknowledge_outcomes() {
        let store = ConfigStore::new();
        let key = SessionKey(1);

        assert_eq!(
            store.acknowledge(Service::NetworkInformation, key, 1).await,
            AckOutcome::Unknown
        );

        store.publish(&nwi(&["en0"])).await.unwrap();
        assert_eq!(
            store.acknowledge(Service::NetworkInformation, key, 1).await,
            AckOutcome::Recorded
        );
        assert_eq!(
            store.acknowledge(Service::NetworkInformation, key, 1).await,
            AckOutcome::Duplicate
        );

        store.publish(&nwi(&["en0", "en1"])).await.unwrap();
        let before = store.status().await;
        assert_eq!(
            store.acknowledge(Service::NetworkInformation, key, 1).await,
            AckOutcome::Stale { current: 2 }
        );
        assert_eq!(store.status().await, before);

        assert_eq!(
            store.acknowledge(Service::NetworkInformation, key, 9).await,
            AckOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn test_acknowledge_generation_of_other_service_is_unknown() {
        let store = ConfigStore::new();
        let key = SessionKey(2);
        let dns = DnsConfig {
            resolvers: vec![DnsResolver::with_nameservers(vec!["192.0.2.1".parse().unwrap()])],
            scoped_resolvers: vec![],
        };
        assert_eq!(store.publish(&nwi(&["en0"])).await.unwrap(), 1);
        assert_eq!(store.publish(&dns).await.unwrap(), 2);
        assert_eq!(store.publish(&nwi(&["en1"])).await.unwrap(), 3);

        // generation 2 went to DNS, never to NWI
        assert_eq!(
            store.acknowledge(Service::NetworkInformation, key, 2).await,
            AckOutcome::Unknown
        );
        assert_eq!(
            store.acknowledge(Service::NetworkInformation, key, 1).await,
            AckOutcome::Stale { current: 3 }
        );
        assert_eq!(
            store.acknowledge(Service::DnsConfiguration, key, 2).await,
            AckOutcome::Recorded
        );
    }

    #[tokio::test]
    async fn test_forget_session_clears_acks() {
        let store = ConfigStore::new();
        store.publish(&nwi(&["en0"])).await.unwrap();
        store.acknowledge(Service::NetworkInformation, SessionKey(4), 1).await;
        assert_eq!(store.status().await[0].acknowledged, 1);

        store.forget_session(SessionKey(4)).await;
        assert_eq!(store.status().await[0].acknowledged, 0);
    }

    #[tokio::test]
    async fn test_apply_state_withdraws_missing_sections() {
        let store = ConfigStore::new();
        let state = StateFile::parse("[[nwi.ipv4]]\nname = \"en0\"\n").unwrap();
        store.apply_state(&state).await.unwrap();
        assert!(store.current(Service::NetworkInformation).await.is_some());
        assert!(store.current(Service::DnsConfiguration).await.is_none());

        store.apply_state(&StateFile::default()).await.unwrap();
        assert!(store.current(Service::NetworkInformation).await.is_none());
        assert_eq!(store.generation().await, 2);
    }
}
