//! Daemon lock management
//!
//! Only one sysconfd may serve a socket at a time. The lock is a JSON
//! lease file refreshed by the daemon's heartbeat.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::IpcError;
use crate::DEFAULT_LEASE_MS;

/// Daemon lock stored at `<lock_dir>/sysconfd.lock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLock {
    /// Process ID of the lock holder
    pub pid: u32,
    /// Random identifier for this daemon run
    pub daemon_id: String,
    /// When the daemon started (Unix timestamp in ms)
    pub started_ts: u64,
    /// Socket the daemon serves
    pub socket_path: String,
    /// Lease duration in milliseconds
    pub lease_ms: u64,
    /// Last heartbeat timestamp (Unix timestamp in ms)
    pub last_heartbeat_ts: u64,
    /// When the lock expires (Unix timestamp in ms)
    pub expires_ts: u64,
}

impl DaemonLock {
    pub fn new(pid: u32, socket_path: String) -> Self {
        let now = current_time_ms();
        Self {
            pid,
            daemon_id: uuid::Uuid::new_v4().to_string(),
            started_ts: now,
            socket_path,
            lease_ms: DEFAULT_LEASE_MS,
            last_heartbeat_ts: now,
            expires_ts: now + DEFAULT_LEASE_MS,
        }
    }

    pub fn is_expired(&self) -> bool {
        current_time_ms() > self.expires_ts
    }

    pub fn is_owned_by_current_process(&self) -> bool {
        self.pid == std::process::id()
    }

    /// Remaining time until expiration in milliseconds
    pub fn time_remaining_ms(&self) -> u64 {
        self.expires_ts.saturating_sub(current_time_ms())
    }

    /// Refresh the heartbeat and extend the lease
    pub fn refresh(&mut self) {
        let now = current_time_ms();
        self.last_heartbeat_ts = now;
        self.expires_ts = now + self.lease_ms;
    }

    pub fn lock_path(lock_dir: &Path) -> PathBuf {
        lock_dir.join("sysconfd.lock")
    }

    pub fn read(lock_dir: &Path) -> Result<Option<Self>, IpcError> {
        let path = Self::lock_path(lock_dir);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        let lock: DaemonLock = serde_json::from_str(&contents)?;
        Ok(Some(lock))
    }

    pub fn write(&self, lock_dir: &Path) -> Result<(), IpcError> {
        fs::create_dir_all(lock_dir)?;
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(Self::lock_path(lock_dir), contents)?;
        Ok(())
    }

    pub fn remove(lock_dir: &Path) -> Result<(), IpcError> {
        let path = Self::lock_path(lock_dir);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Take the lock unless another live daemon holds it
    pub fn acquire(lock_dir: &Path, socket_path: String) -> Result<Self, IpcError> {
        if let Some(existing) = Self::read(lock_dir)? {
            if !existing.is_expired() && !existing.is_owned_by_current_process() {
                return Err(IpcError::LockHeld {
                    pid: existing.pid,
                    expires_in_ms: existing.time_remaining_ms(),
                });
            }
        }

        let lock = DaemonLock::new(std::process::id(), socket_path);
        lock.write(lock_dir)?;
        Ok(lock)
    }

    /// Release the lock (only if owned by current process)
    pub fn release(lock_dir: &Path) -> Result<(), IpcError> {
        if let Some(lock) = Self::read(lock_dir)? {
            if lock.is_owned_by_current_process() {
                Self::remove(lock_dir)?;
            }
        }
        Ok(())
    }
}

fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
