//! DNS resolver configuration

use std::net::IpAddr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::service::Service;
use crate::snapshot::SnapshotPayload;

bitflags! {
    /// Record types a resolver should be queried for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResolverFlags: u32 {
        const REQUEST_A_RECORDS = 0x0002;
        const REQUEST_AAAA_RECORDS = 0x0004;
    }
}

/// Default DNS port
pub const DEFAULT_PORT: u16 = 53;

/// Default query timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u32 = 30;

/// A single resolver entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsResolver {
    /// Domain this resolver answers for (None for a default resolver)
    pub domain: Option<String>,
    pub nameservers: Vec<IpAddr>,
    pub port: u16,
    /// Search domains, in order
    pub search: Vec<String>,
    /// Lower values are consulted first
    pub search_order: u32,
    pub timeout_secs: u32,
    /// Interface the resolver is scoped to (0 = unscoped)
    pub if_index: u32,
    /// Raw `ResolverFlags` bits
    pub flags: u32,
    pub options: Option<String>,
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self {
            domain: None,
            nameservers: Vec::new(),
            port: DEFAULT_PORT,
            search: Vec::new(),
            search_order: 0,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            if_index: 0,
            flags: (ResolverFlags::REQUEST_A_RECORDS | ResolverFlags::REQUEST_AAAA_RECORDS).bits(),
            options: None,
        }
    }
}

impl DnsResolver {
    /// Create a default resolver for the given nameservers
    pub fn with_nameservers(nameservers: Vec<IpAddr>) -> Self {
        Self {
            nameservers,
            ..Self::default()
        }
    }

    pub fn request_flags(&self) -> ResolverFlags {
        ResolverFlags::from_bits_truncate(self.flags)
    }

    fn entry_count(&self) -> usize {
        1 + self.nameservers.len() + self.search.len()
    }
}

/// The system DNS configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Default and supplemental resolvers
    pub resolvers: Vec<DnsResolver>,
    /// Resolvers bound to a specific interface
    pub scoped_resolvers: Vec<DnsResolver>,
}

impl DnsConfig {
    /// Resolvers sorted by search order, ties kept in configured order
    pub fn resolvers_by_search_order(&self) -> Vec<&DnsResolver> {
        let mut sorted: Vec<&DnsResolver> = self.resolvers.iter().collect();
        sorted.sort_by_key(|r| r.search_order);
        sorted
    }

    /// The first resolver without a domain, if any
    pub fn default_resolver(&self) -> Option<&DnsResolver> {
        self.resolvers_by_search_order()
            .into_iter()
            .find(|r| r.domain.is_none())
    }
}

impl SnapshotPayload for DnsConfig {
    const SERVICE: Service = Service::DnsConfiguration;

    fn padding_hint(&self) -> u32 {
        // one pointer-sized slot per resolver, nameserver and search domain
        let entries: usize = self
            .resolvers
            .iter()
            .chain(self.scoped_resolvers.iter())
            .map(DnsResolver::entry_count)
            .sum();
        (entries * std::mem::size_of::<u64>()) as u32
    }
}
