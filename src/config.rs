//! Client configuration: file layer, environment overrides, defaults.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable naming the server to connect to.
pub const ENV_SERVER: &str = "SONANCE_SERVER";

/// Environment variable overriding the auth cookie path.
pub const ENV_COOKIE: &str = "SONANCE_COOKIE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server specification; `None` falls back to [`ENV_SERVER`] and then
    /// the per-user default socket.
    pub server: Option<String>,

    /// Auth cookie path; `None` falls back to [`ENV_COOKIE`] and then
    /// `~/.sonance-cookie`.
    pub cookie_path: Option<PathBuf>,

    /// Deadline for each registered reply.
    pub reply_timeout_ms: u64,

    /// Bound on the initial TCP connect.
    pub connect_timeout_ms: u64,

    /// Largest frame accepted or produced by the transport.
    pub max_frame_bytes: usize,

    /// TCP port used when the server specification has none.
    pub default_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            cookie_path: None,
            reply_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            max_frame_bytes: 1024 * 1024,
            default_port: 6462,
        }
    }
}

impl ClientConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Load the user config file if present, then apply environment
    /// overrides on top.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                toml::from_str(&contents).map_err(|e| {
                    Error::Config(format!("failed to parse {}: {e}", path.display()))
                })?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server) = env::var(ENV_SERVER)
            && !server.trim().is_empty()
        {
            self.server = Some(server);
        }
        if let Ok(cookie) = env::var(ENV_COOKIE)
            && !cookie.trim().is_empty()
        {
            self.cookie_path = Some(PathBuf::from(cookie));
        }
    }
}

/// `$XDG_CONFIG_HOME/sonance/client.toml`, falling back to
/// `~/.config/sonance/client.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(dir) = env::var("XDG_CONFIG_HOME")
        && !dir.trim().is_empty()
    {
        return Some(PathBuf::from(dir).join("sonance").join("client.toml"));
    }
    let home = env::var("HOME").ok().filter(|h| !h.trim().is_empty())?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("sonance")
            .join("client.toml"),
    )
}
