//! Change notifications
//!
//! The daemon emits these whenever it publishes state. Subscribers
//! should treat unknown variants as ignorable.

use libsysconf_core::Service;
use rkyv::{Archive, Deserialize, Serialize};

/// Notifications emitted by the daemon
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub enum Notification {
    /// A service published a new snapshot
    ConfigurationChanged {
        /// Well-known key for the service
        notify_key: String,
        generation: u64,
    },

    /// The daemon is shutting down
    DaemonStopping {
        reason: String,
    },
}

impl Notification {
    pub fn notification_type(&self) -> &'static str {
        match self {
            Notification::ConfigurationChanged { .. } => "ConfigurationChanged",
            Notification::DaemonStopping { .. } => "DaemonStopping",
        }
    }

    pub fn configuration_changed(service: Service, generation: u64) -> Self {
        Notification::ConfigurationChanged {
            notify_key: service.notify_key().to_string(),
            generation,
        }
    }

    pub fn daemon_stopping(reason: impl Into<String>) -> Self {
        Notification::DaemonStopping {
            reason: reason.into(),
        }
    }

    /// Key to post on, if this notification is tied to a service
    pub fn notify_key(&self) -> Option<&str> {
        match self {
            Notification::ConfigurationChanged { notify_key, .. } => Some(notify_key),
            Notification::DaemonStopping { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_changed_uses_service_key() {
        let n = Notification::configuration_changed(Service::NetworkInformation, 4);
        assert_eq!(n.notification_type(), "ConfigurationChanged");
        assert_eq!(n.notify_key(), Some(Service::NetworkInformation.notify_key()));
    }

    #[test]
    fn test_stopping_has_no_key() {
        let n = Notification::daemon_stopping("SIGTERM");
        assert_eq!(n.notify_key(), None);
    }
}
