//! Filesystem locations used by the relay binary.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Resolved locations for config and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPaths {
    pub config: PathBuf,
    pub logs: PathBuf,
}

impl RelayPaths {
    /// Returns the base directory: `~/.relay`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".relay"))
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok(), Self::base_dir)
    }

    /// `RELAY_CONFIG` and `RELAY_LOG_DIR` win over `base/config.json` and
    /// `base/logs`. The base directory is only resolved when needed.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        base: impl FnOnce() -> Result<PathBuf>,
    ) -> Result<Self> {
        let config = lookup("RELAY_CONFIG").filter(|v| !v.is_empty()).map(PathBuf::from);
        let logs = lookup("RELAY_LOG_DIR").filter(|v| !v.is_empty()).map(PathBuf::from);

        match (config, logs) {
            (Some(config), Some(logs)) => Ok(Self { config, logs }),
            (config, logs) => {
                let base = base()?;
                Ok(Self {
                    config: config.unwrap_or_else(|| base.join("config.json")),
                    logs: logs.unwrap_or_else(|| base.join("logs")),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_under_base() {
        let paths = RelayPaths::resolve(|_| None, || Ok(PathBuf::from("/home/u/.relay"))).unwrap();
        assert_eq!(paths.config, PathBuf::from("/home/u/.relay/config.json"));
        assert_eq!(paths.logs, PathBuf::from("/home/u/.relay/logs"));
    }

    #[test]
    fn test_env_overrides() {
        let paths = RelayPaths::resolve(
            |key| match key {
                "RELAY_CONFIG" => Some("/etc/relay.json".into()),
                _ => None,
            },
            || Ok(PathBuf::from("/home/u/.relay")),
        )
        .unwrap();
        assert_eq!(paths.config, PathBuf::from("/etc/relay.json"));
        assert_eq!(paths.logs, PathBuf::from("/home/u/.relay/logs"));
    }

    #[test]
    fn test_full_override_skips_home_lookup() {
        let paths = RelayPaths::resolve(
            |key| match key {
                "RELAY_CONFIG" => Some("/etc/relay.json".into()),
                "RELAY_LOG_DIR" => Some("/var/log/relay".into()),
                _ => None,
            },
            || anyhow::bail!("no home"),
        )
        .unwrap();
        assert_eq!(paths.logs, PathBuf::from("/var/log/relay"));
    }

    #[test]
    fn test_missing_home_is_an_error() {
        let result = RelayPaths::resolve(|_| None, || anyhow::bail!("no home"));
        assert!(result.is_err());
    }
}
