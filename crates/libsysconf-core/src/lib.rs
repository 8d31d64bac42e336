//! Core library for sysconf
//!
//! This crate provides:
//! - Ranked network interface lists (NwiState, NwiIfState)
//! - DNS resolver configuration (DnsConfig, DnsResolver)
//! - Snapshot buffer layout, validation and expansion
//! - Service identities and change-notification keys
//! - Daemon and state-file configuration

pub mod config;
pub mod dns;
pub mod error;
pub mod nwi;
pub mod service;
pub mod snapshot;

pub use dns::{DnsConfig, DnsResolver, ResolverFlags};
pub use error::{CoreError, CorruptSnapshot};
pub use nwi::{AddressFamily, IfStateFlags, NwiIfState, NwiState, NwiStateBuilder, RankOrder};
pub use service::{dns_configuration_notify_key, nwi_state_notify_key, Service};
pub use snapshot::{ParsedHeader, Snapshot, SnapshotBuffer, SnapshotPayload};
