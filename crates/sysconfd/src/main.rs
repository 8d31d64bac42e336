//! sysconfd - configuration snapshot daemon
//!
//! Publishes the state file's DNS resolvers and ranked interfaces, serves
//! copies to clients, and re-publishes on SIGHUP.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use libsysconf_core::config::{load_daemon_config, DaemonConfig, StateFile};
use libsysconf_ipc::{resolve_endpoint, DaemonLock};
use sysconfd::{ConfigStore, Daemon, DaemonError, SessionHandle};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "/etc/sysconfd.toml";
const DEFAULT_LOCK_DIR: &str = "/var/run/sysconfd";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "sysconfd", about = "Configuration snapshot daemon", version)]
struct Cli {
    /// Unix socket to listen on
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Daemon config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// State file to publish (reloaded on SIGHUP)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Directory for the daemon lock
    #[arg(long)]
    lock_dir: Option<PathBuf>,

    /// PID file path
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct Settings {
    socket: PathBuf,
    state_file: Option<PathBuf>,
    lock_dir: PathBuf,
}

impl Settings {
    // Flags win over the config file
    fn resolve(cli: &Cli, config: DaemonConfig) -> Self {
        let socket = cli
            .socket
            .clone()
            .or(config.socket_path)
            .unwrap_or_else(|| resolve_endpoint(None));
        Self {
            socket,
            state_file: cli.state_file.clone().or(config.state_file),
            lock_dir: cli
                .lock_dir
                .clone()
                .or(config.lock_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_DIR)),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("sysconfd starting");

    if let Err(e) = run(&cli).await {
        error!("sysconfd failed: {}", e);
        std::process::exit(1);
    }

    info!("sysconfd stopped");
}

async fn run(cli: &Cli) -> Result<(), DaemonError> {
    let config = load_daemon_config(&cli.config)?.unwrap_or_default();
    let settings = Settings::resolve(cli, config);

    if unsafe { libc::geteuid() } != 0 {
        warn!(socket = %settings.socket.display(), "not running as root");
    }

    let mut lock = DaemonLock::acquire(
        &settings.lock_dir,
        settings.socket.to_string_lossy().to_string(),
    )
    .map_err(|e| DaemonError::LockFailed(e.to_string()))?;

    if let Some(ref pid_file) = cli.pid_file {
        if let Err(e) = std::fs::write(pid_file, std::process::id().to_string()) {
            error!("Failed to write PID file: {}", e);
        }
    }

    let result = serve(&settings, &mut lock).await;

    if let Err(e) = DaemonLock::release(&settings.lock_dir) {
        warn!(error = %e, "failed to release daemon lock");
    }
    if let Some(ref pid_file) = cli.pid_file {
        let _ = std::fs::remove_file(pid_file);
    }
    result
}

async fn serve(settings: &Settings, lock: &mut DaemonLock) -> Result<(), DaemonError> {
    let daemon = Daemon::bind(&settings.socket).await?;
    let store = daemon.store();
    let sessions = daemon.sessions();

    if let Some(ref path) = settings.state_file {
        reload_state(&store, path).await;
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let server = tokio::spawn(daemon.run(shutdown_rx));

    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt");
                break;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = hangup.recv() => {
                match settings.state_file {
                    Some(ref path) => reload_state(&store, path).await,
                    None => info!("SIGHUP ignored, no state file configured"),
                }
            }
            _ = user1.recv() => dump_sessions(&sessions, &store).await,
            _ = heartbeat.tick() => {
                lock.refresh();
                if let Err(e) = lock.write(&settings.lock_dir) {
                    warn!(error = %e, "failed to refresh daemon lock");
                }
            }
        }
    }

    store.announce(libsysconf_ipc::Notification::daemon_stopping("signal"));
    let _ = shutdown_tx.send(());
    match server.await {
        Ok(result) => result,
        Err(e) => Err(DaemonError::Channel(e.to_string())),
    }
}

async fn reload_state(store: &Arc<ConfigStore>, path: &Path) {
    match StateFile::load(path) {
        Ok(state) => match store.apply_state(&state).await {
            Ok(()) => info!(path = %path.display(), generation = store.generation().await, "state loaded"),
            Err(e) => error!(path = %path.display(), error = %e, "failed to publish state"),
        },
        Err(e) => error!(path = %path.display(), error = %e, "failed to load state file, keeping current state"),
    }
}

async fn dump_sessions(sessions: &SessionHandle, store: &Arc<ConfigStore>) {
    for status in store.status().await {
        info!(
            service = %status.service,
            generation = status.generation,
            size = status.size,
            acknowledged = status.acknowledged,
            "service"
        );
    }
    match sessions.list().await {
        Ok(list) => {
            info!(count = list.len(), "sessions");
            for s in list {
                info!(
                    session = %s.key,
                    uid = s.credentials.uid,
                    gid = s.credentials.gid,
                    pid = ?s.credentials.pid,
                    acknowledged = ?s.acknowledged,
                    "session"
                );
            }
        }
        Err(e) => warn!(error = %e, "failed to list sessions"),
    }
}
