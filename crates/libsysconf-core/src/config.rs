use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dns::{DnsConfig, DnsResolver};
use crate::error::CoreError;
use crate::nwi::{AddressFamily, IfStateFlags, NwiState};

/// Daemon configuration, usually `/etc/sysconfd.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    /// State file published at start and on SIGHUP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    /// Directory holding the daemon lock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<PathBuf>,
}

/// Load the daemon config, `None` if the file does not exist
pub fn load_daemon_config(path: &Path) -> Result<Option<DaemonConfig>, CoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let config: DaemonConfig = toml::from_str(&content)?;
    Ok(Some(config))
}

/// One interface in a state file's ranked list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceEntry {
    pub name: String,
    /// DNS is configured on this interface
    #[serde(default)]
    pub dns: bool,
    /// Explicit rank; entries without one rank after the entries before them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

/// Ranked interfaces, highest priority first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NwiSection {
    #[serde(default)]
    pub ipv4: Vec<InterfaceEntry>,
    #[serde(default)]
    pub ipv6: Vec<InterfaceEntry>,
}

/// Published state, as written by whatever computes it
///
/// A missing section means the daemon has no state for that service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nwi: Option<NwiSection>,
}

impl StateFile {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let state: StateFile = toml::from_str(content)?;
        state.validate()?;
        Ok(state)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if let Some(dns) = &self.dns {
            let all = dns.resolvers.iter().chain(dns.scoped_resolvers.iter());
            for resolver in all {
                check_resolver(resolver)?;
            }
        }
        if let Some(nwi) = &self.nwi {
            for entry in nwi.ipv4.iter().chain(nwi.ipv6.iter()) {
                if entry.name.is_empty() {
                    return Err(CoreError::InvalidConfig(
                        "interface name must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn dns_config(&self) -> Option<DnsConfig> {
        self.dns.clone()
    }

    pub fn nwi_state(&self) -> Option<NwiState> {
        let section = self.nwi.as_ref()?;
        let mut builder = NwiState::builder();
        for (af, entries) in [
            (AddressFamily::Inet, &section.ipv4),
            (AddressFamily::Inet6, &section.ipv6),
        ] {
            for entry in entries {
                let flags = if entry.dns {
                    IfStateFlags::HAS_DNS
                } else {
                    IfStateFlags::empty()
                };
                builder = match entry.rank {
                    Some(rank) => builder.add_ranked(af, entry.name.clone(), flags, rank),
                    None => builder.add(af, entry.name.clone(), flags),
                };
            }
        }
        Some(builder.build())
    }
}

fn check_resolver(resolver: &DnsResolver) -> Result<(), CoreError> {
    if resolver.nameservers.is_empty() && resolver.options.is_none() {
        return Err(CoreError::InvalidConfig(format!(
            "resolver {} has no nameservers",
            resolver.domain.as_deref().unwrap_or("<default>")
        )));
    }
    if resolver.port == 0 {
        return Err(CoreError::InvalidConfig("resolver port must not be 0".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STATE: &str = r#"
[[dns.resolvers]]
nameservers = ["192.0.2.53", "2001:db8::53"]
search = ["example.com"]

[[dns.resolvers]]
domain = "corp.example"
nameservers = ["10.0.0.53"]
search_order = 1

[[nwi.ipv4]]
name = "en0"
dns = true

[[nwi.ipv4]]
name = "en1"

[[nwi.ipv6]]
name = "en0"
dns = true
"#;

    #[test]
    fn test_daemon_config_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sysconfd.toml");
        std::fs::write(
            &path,
            "socket_path = \"/run/sysconfd.sock\"\nstate_file = \"/var/db/sysconfd/state.toml\"\n",
        )
        .unwrap();
        let loaded = load_daemon_config(&path).unwrap().unwrap();

        assert_eq!(loaded.socket_path, Some(PathBuf::from("/run/sysconfd.sock")));
        assert_eq!(loaded.state_file, Some(PathBuf::from("/var/db/sysconfd/state.toml")));
        assert!(loaded.lock_dir.is_none());
    }

    #[test]
    fn test_missing_daemon_config() {
        let dir = tempdir().unwrap();
        assert!(load_daemon_config(&dir.path().join("nope.toml")).unwrap().is_none());
    }

    #[test]
    fn test_state_file_parse() {
        let state = StateFile::parse(STATE).unwrap();

        let dns = state.dns_config().unwrap();
        assert_eq!(dns.resolvers.len(), 2);
        assert_eq!(dns.resolvers[0].port, 53);
        assert_eq!(dns.resolvers[1].domain.as_deref(), Some("corp.example"));

        let nwi = state.nwi_state().unwrap();
        let names: Vec<&str> = nwi.interfaces(AddressFamily::Inet).map(|i| i.name()).collect();
        assert_eq!(names, ["en0", "en1"]);
        let en0 = nwi.ifstate("en0").unwrap();
        assert_eq!(
            en0.flags(),
            IfStateFlags::HAS_IPV4 | IfStateFlags::HAS_IPV6 | IfStateFlags::HAS_DNS
        );
    }

    #[test]
    fn test_state_file_missing_sections() {
        let state = StateFile::parse("").unwrap();
        assert!(state.dns_config().is_none());
        assert!(state.nwi_state().is_none());
    }

    #[test]
    fn test_state_file_rejects_resolver_without_nameservers() {
        let err = StateFile::parse("[[dns.resolvers]]\ndomain = \"x.example\"\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_state_file_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, STATE).unwrap();
        let state = StateFile::load(&path).unwrap();
        assert!(state.dns.is_some());
        assert!(state.nwi.is_some());
    }
}
