//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/handwave/config.toml or
/// /etc/handwave/config.toml. Env overrides: HANDWAVE_PORT, HANDWAVE_OWNER,
/// HANDWAVE_DEVICE, HANDWAVE_DATA_PATH.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP port for broadcast announces (default 45710).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between announce cycles (default 5).
    #[serde(default = "default_announce_secs")]
    pub announce_interval_secs: u64,
    /// Seconds between eviction sweeps (default 10).
    #[serde(default = "default_maintenance_secs")]
    pub maintenance_interval_secs: u64,
    /// Seconds between storage snapshots (default 30).
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_interval_secs: u64,
    /// Seconds a peer may go unseen before eviction (default 15).
    #[serde(default = "default_peer_max_age_secs")]
    pub peer_max_age_secs: u64,
    /// Owner display label (<=19 bytes on the wire).
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Device display label (<=31 bytes on the wire).
    #[serde(default = "default_device")]
    pub device: String,
    /// Path of the persisted key-value store.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
}

fn default_port() -> u16 {
    45710
}
fn default_announce_secs() -> u64 {
    5
}
fn default_maintenance_secs() -> u64 {
    10
}
fn default_snapshot_secs() -> u64 {
    30
}
fn default_peer_max_age_secs() -> u64 {
    15
}
fn default_owner() -> String {
    "anonymous".to_string()
}
fn default_device() -> String {
    "handwave".to_string()
}
fn default_data_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local/share/handwave/state.kv")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            announce_interval_secs: default_announce_secs(),
            maintenance_interval_secs: default_maintenance_secs(),
            snapshot_interval_secs: default_snapshot_secs(),
            peer_max_age_secs: default_peer_max_age_secs(),
            owner: default_owner(),
            device: default_device(),
            data_path: default_data_path(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("HANDWAVE_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("HANDWAVE_OWNER") {
        if !s.is_empty() {
            c.owner = s;
        }
    }
    if let Ok(s) = std::env::var("HANDWAVE_DEVICE") {
        if !s.is_empty() {
            c.device = s;
        }
    }
    if let Ok(s) = std::env::var("HANDWAVE_DATA_PATH") {
        if !s.is_empty() {
            c.data_path = PathBuf::from(s);
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/handwave/config.toml"));
    }
    out.push(PathBuf::from("/etc/handwave/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), %e, "ignoring invalid config file"),
                }
            }
            break;
        }
    }
    None
}
