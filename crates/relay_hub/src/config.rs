//! Relay configuration.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when a peer connects with an id that is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Refuse the new connection and keep the existing one.
    #[default]
    Reject,
    /// Tear down the existing entry and close its connection.
    Replace,
}

/// Configuration for the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address peers connect to (`ws://{listen_addr}/ws/{peer_id}/{role}`).
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,

    /// Whether the HTTP admin surface is served.
    pub admin_enabled: bool,

    /// Address of the HTTP admin surface.
    #[serde(with = "socket_addr_serde")]
    pub admin_addr: SocketAddr,

    /// Interval between liveness sweeps.
    #[serde(with = "duration_serde")]
    pub liveness_sweep_interval: Duration,

    /// Peers silent for longer than this are evicted.
    #[serde(with = "duration_serde")]
    pub liveness_timeout: Duration,

    pub duplicate_policy: DuplicatePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            admin_enabled: true,
            admin_addr: SocketAddr::from(([127, 0, 0, 1], 8001)),
            liveness_sweep_interval: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(120),
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

impl RelayConfig {
    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<RelayConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }

    /// Apply `RELAY_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = parse_override::<SocketAddr>(&lookup, "RELAY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(addr) = parse_override::<SocketAddr>(&lookup, "RELAY_ADMIN_ADDR") {
            self.admin_addr = addr;
        }
        if let Some(secs) = parse_override::<u64>(&lookup, "RELAY_LIVENESS_TIMEOUT_SECS") {
            self.liveness_timeout = Duration::from_secs(secs);
        }
        self
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {key}={raw}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
