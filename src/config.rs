//! Environment-driven configuration.
//!
//! Recognized keys, all optional:
//!
//! | Key | Default | Meaning |
//! |-----|---------|---------|
//! | `TRACKER_UDP_PORT` | 9999 | Tracker protocol socket |
//! | `TRACKER_WS_PORT` | 8081 | WebSocket push port |
//! | `TRACKER_HTTP_PORT` | 9998 | HTTP read/upload API |
//! | `TRACKER_LOCAL_PLAYER` | — | Identity bound to the local gamelog |
//! | `TRACKER_GAMELOG_DIRS` | platform dirs | `:`-separated watch directories |
//! | `TRACKER_SNAPSHOT_PATH` | `tracker-state.json` | Snapshot file path |
//! | `TRACKER_ARCHIVE_DIR` | — | Finished-match JSON directory; unset = discard |

use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric key failed to parse.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Offending key.
        key: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// UDP tracker protocol port.
    pub udp_port: u16,
    /// WebSocket push port.
    pub ws_port: u16,
    /// HTTP API port.
    pub http_port: u16,
    /// Identity bound to the locally watched gamelog.
    pub local_player: Option<String>,
    /// Directories probed for `gamelog.txt`.
    pub gamelog_dirs: Vec<PathBuf>,
    /// Snapshot file path.
    pub snapshot_path: PathBuf,
    /// Directory for finished-match documents; `None` discards them.
    pub archive_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udp_port: 9999,
            ws_port: 8081,
            http_port: 9998,
            local_player: None,
            gamelog_dirs: default_gamelog_dirs(),
            snapshot_path: PathBuf::from("tracker-state.json"),
            archive_dir: None,
        }
    }
}

impl Config {
    /// Build from the environment, falling back to defaults per key.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.udp_port = port_from_env("TRACKER_UDP_PORT", config.udp_port)?;
        config.ws_port = port_from_env("TRACKER_WS_PORT", config.ws_port)?;
        config.http_port = port_from_env("TRACKER_HTTP_PORT", config.http_port)?;
        if let Ok(player) = std::env::var("TRACKER_LOCAL_PLAYER") {
            if !player.trim().is_empty() {
                config.local_player = Some(player.trim().to_string());
            }
        }
        if let Ok(dirs) = std::env::var("TRACKER_GAMELOG_DIRS") {
            config.gamelog_dirs =
                dirs.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect();
        }
        if let Ok(path) = std::env::var("TRACKER_SNAPSHOT_PATH") {
            config.snapshot_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("TRACKER_ARCHIVE_DIR") {
            config.archive_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }
}

fn port_from_env(key: &'static str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
}

/// Explicit override wins; otherwise the stock DXX profile directories under
/// the home directory, plus the working directory for portable installs.
fn default_gamelog_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        dirs.push(home.join(".d1x-rebirth"));
        dirs.push(home.join(".d2x-rebirth"));
        dirs.push(home.join(".d1x-redux"));
        dirs.push(home.join(".d2x-redux"));
    }
    dirs.push(PathBuf::from("."));
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.udp_port, 9999);
        assert_eq!(config.ws_port, 8081);
        assert_eq!(config.http_port, 9998);
        assert!(config.local_player.is_none());
        assert!(!config.gamelog_dirs.is_empty());
    }
}
