//! Services published by the daemon
//!
//! Each service is one logical topic: one payload type, one snapshot kind and
//! one change-notification key.

use std::fmt;

/// Notification key posted whenever the DNS configuration changes
pub const DNS_CONFIGURATION_NOTIFY_KEY: &str = "org.sysconf.system.dns_configuration";

/// Notification key posted whenever the network information changes
pub const NWI_STATE_NOTIFY_KEY: &str = "org.sysconf.system.network_change.nwi";

/// A configuration topic served by sysconfd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    DnsConfiguration,
    NetworkInformation,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::DnsConfiguration, Service::NetworkInformation];

    /// Service name, used in logs and connection descriptions
    pub fn service_name(self) -> &'static str {
        match self {
            Service::DnsConfiguration => "org.sysconf.dnsinfo",
            Service::NetworkInformation => "org.sysconf.nwi",
        }
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            Service::DnsConfiguration => "DNS configuration",
            Service::NetworkInformation => "Network information",
        }
    }

    /// Change-notification key for this service
    pub fn notify_key(self) -> &'static str {
        match self {
            Service::DnsConfiguration => DNS_CONFIGURATION_NOTIFY_KEY,
            Service::NetworkInformation => NWI_STATE_NOTIFY_KEY,
        }
    }

    /// Payload kind stored in snapshot headers and request envelopes
    pub fn kind(self) -> u32 {
        match self {
            Service::DnsConfiguration => 1,
            Service::NetworkInformation => 2,
        }
    }

    pub fn from_kind(kind: u32) -> Option<Self> {
        match kind {
            1 => Some(Service::DnsConfiguration),
            2 => Some(Service::NetworkInformation),
            _ => None,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

/// Key to monitor for DNS configuration changes
pub fn dns_configuration_notify_key() -> &'static str {
    DNS_CONFIGURATION_NOTIFY_KEY
}

/// Key to monitor for network information changes
pub fn nwi_state_notify_key() -> &'static str {
    NWI_STATE_NOTIFY_KEY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for service in Service::ALL {
            assert_eq!(Service::from_kind(service.kind()), Some(service));
        }
        assert_eq!(Service::from_kind(0), None);
        assert_eq!(Service::from_kind(99), None);
    }

    #[test]
    fn test_notify_keys_are_stable() {
        assert_eq!(
            dns_configuration_notify_key(),
            "org.sysconf.system.dns_configuration"
        );
        assert_eq!(nwi_state_notify_key(), "org.sysconf.system.network_change.nwi");
        assert_ne!(
            Service::DnsConfiguration.notify_key(),
            Service::NetworkInformation.notify_key()
        );
    }
}
