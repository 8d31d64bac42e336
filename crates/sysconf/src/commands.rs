//! Subcommand implementations

use std::path::Path;

use libsysconf_core::{
    dns_configuration_notify_key, nwi_state_notify_key, AddressFamily, DnsResolver, IfStateFlags,
    NwiState, Service,
};
use libsysconf_ipc::{resolve_endpoint, DaemonLock, DnsConfigurationClient, NwiClient};
use serde_json::json;

use crate::cli::{Cli, Family};
use crate::error::CliError;

fn endpoint(cli: &Cli) -> std::path::PathBuf {
    resolve_endpoint(cli.socket.as_deref())
}

pub fn dns(cli: &Cli, acknowledge: bool) -> Result<(), CliError> {
    let client = DnsConfigurationClient::new(endpoint(cli))?;
    let snapshot = client
        .copy()?
        .ok_or_else(|| CliError::no_data(Service::DnsConfiguration))?;
    if acknowledge {
        client.acknowledge(&snapshot, Some("sysconf"));
        // The actor handles commands in order, so this waits for the write
        let _ = client.connection().status();
    }

    if cli.json {
        println!(
            "{}",
            json!({
                "generation": snapshot.generation(),
                "configuration": serde_json::to_value(snapshot.payload())?,
            })
        );
    } else if !cli.quiet {
        println!("DNS configuration (generation {})", snapshot.generation());
        for (i, resolver) in snapshot.resolvers_by_search_order().into_iter().enumerate() {
            print_resolver(&format!("resolver #{}", i + 1), resolver);
        }
        for (i, resolver) in snapshot.scoped_resolvers.iter().enumerate() {
            print_resolver(&format!("scoped resolver #{}", i + 1), resolver);
        }
    }
    Ok(())
}

fn print_resolver(label: &str, resolver: &DnsResolver) {
    println!("{}", label);
    if let Some(ref domain) = resolver.domain {
        println!("  domain    : {}", domain);
    }
    for search in &resolver.search {
        println!("  search    : {}", search);
    }
    for ns in &resolver.nameservers {
        println!("  nameserver: {}", ns);
    }
    if resolver.port != libsysconf_core::dns::DEFAULT_PORT {
        println!("  port      : {}", resolver.port);
    }
    if resolver.if_index != 0 {
        println!("  if_index  : {}", resolver.if_index);
    }
    println!("  order     : {}", resolver.search_order);
    println!("  timeout   : {}s", resolver.timeout_secs);
    println!("  flags     : {:?}", resolver.request_flags());
    if let Some(ref options) = resolver.options {
        println!("  options   : {}", options);
    }
}

pub fn nwi(cli: &Cli, family: Family, acknowledge: bool) -> Result<(), CliError> {
    let client = NwiClient::new(endpoint(cli))?;
    let snapshot = client
        .copy()?
        .ok_or_else(|| CliError::no_data(Service::NetworkInformation))?;
    if acknowledge {
        client.acknowledge(&snapshot, Some("sysconf"));
        // The actor handles commands in order, so this waits for the write
        let _ = client.connection().status();
    }

    let families: &[AddressFamily] = match family {
        Family::Inet => &[AddressFamily::Inet],
        Family::Inet6 => &[AddressFamily::Inet6],
        Family::All => &[AddressFamily::Inet, AddressFamily::Inet6],
    };

    if cli.json {
        let mut out = serde_json::Map::new();
        for af in families {
            out.insert(family_name(*af).to_string(), interfaces_json(&snapshot, *af));
        }
        println!(
            "{}",
            json!({
                "generation": snapshot.generation(),
                "interfaces": out,
            })
        );
    } else if !cli.quiet {
        println!("Network information (generation {})", snapshot.generation());
        for af in families {
            println!("{}:", family_name(*af));
            let mut ifstate = snapshot.first_ifstate(*af);
            if ifstate.is_none() {
                println!("  (none)");
            }
            while let Some(current) = ifstate {
                println!(
                    "  {:>2}. {:<8} {}",
                    current.position() + 1,
                    current.name(),
                    flag_names(current.flags()).join(",")
                );
                ifstate = current.next();
            }
        }
    }
    Ok(())
}

fn family_name(af: AddressFamily) -> &'static str {
    match af {
        AddressFamily::Inet => "IPv4",
        AddressFamily::Inet6 => "IPv6",
    }
}

fn flag_names(flags: IfStateFlags) -> Vec<&'static str> {
    flags.iter_names().map(|(name, _)| name).collect()
}

fn interfaces_json(state: &NwiState, af: AddressFamily) -> serde_json::Value {
    let list: Vec<_> = state
        .interfaces(af)
        .map(|i| {
            json!({
                "name": i.name(),
                "rank": i.rank(),
                "flags": flag_names(i.flags()),
            })
        })
        .collect();
    serde_json::Value::Array(list)
}

pub fn status(cli: &Cli, lock_dir: &Path) -> Result<(), CliError> {
    let endpoint = endpoint(cli);
    let lock = DaemonLock::read(lock_dir)?;

    let client = NwiClient::new(endpoint.clone())?;
    let reachable = client.connection().acquire().is_ok();
    if reachable {
        client.connection().release();
    }

    if cli.json {
        println!(
            "{}",
            json!({
                "socket": endpoint.display().to_string(),
                "reachable": reachable,
                "lock": lock.as_ref().map(|l| json!({
                    "pid": l.pid,
                    "daemon_id": l.daemon_id,
                    "socket": l.socket_path,
                    "started_ts": l.started_ts,
                    "expired": l.is_expired(),
                    "expires_in_ms": l.time_remaining_ms(),
                })),
            })
        );
    } else if !cli.quiet {
        println!("Socket: {}", endpoint.display());
        println!(
            "Daemon: {}",
            if reachable { "reachable" } else { "not reachable" }
        );
        match lock {
            Some(lock) => {
                println!("Lock: PID {} ({})", lock.pid, lock.daemon_id);
                println!("  Socket: {}", lock.socket_path);
                if lock.is_expired() {
                    println!("  Lease: expired");
                } else {
                    println!("  Lease: {}s remaining", lock.time_remaining_ms() / 1000);
                }
            }
            None => println!("Lock: none"),
        }
    }
    Ok(())
}

pub fn keys(cli: &Cli) -> Result<(), CliError> {
    if cli.json {
        println!(
            "{}",
            json!({
                "dns_configuration": dns_configuration_notify_key(),
                "nwi_state": nwi_state_notify_key(),
            })
        );
    } else if !cli.quiet {
        for service in Service::ALL {
            println!("{:<22} {}", service.description(), service.notify_key());
        }
    }
    Ok(())
}
