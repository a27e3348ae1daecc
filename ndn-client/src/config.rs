//! Load client config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ndn_core::Key;

use crate::ClientError;

/// Client configuration. File: ~/.config/ndn/client.toml or /etc/ndn/client.toml.
/// Env overrides: NDN_FORWARDER_ADDR, NDN_RUN_TIMEOUT_MS, NDN_TICK_INTERVAL_MS, NDN_KEY_FILE.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Forwarder TCP address (default 127.0.0.1:6363).
    #[serde(default = "default_forwarder_addr")]
    pub forwarder_addr: String,
    /// Default `get` timeout in milliseconds (default 3000).
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    /// Housekeeping tick in milliseconds (default 50).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Lifetime of interests that do not set one (default 4000).
    #[serde(default = "default_interest_lifetime_ms")]
    pub default_interest_lifetime_ms: u64,
    /// PEM private key used to sign published content.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

fn default_forwarder_addr() -> String {
    "127.0.0.1:6363".to_string()
}
fn default_run_timeout_ms() -> u64 {
    3000
}
fn default_tick_interval_ms() -> u64 {
    50
}
fn default_interest_lifetime_ms() -> u64 {
    4000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            forwarder_addr: default_forwarder_addr(),
            run_timeout_ms: default_run_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            default_interest_lifetime_ms: default_interest_lifetime_ms(),
            key_file: None,
        }
    }
}

impl ClientConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn default_interest_lifetime(&self) -> Duration {
        Duration::from_millis(self.default_interest_lifetime_ms)
    }

    /// The injected default key: the private key in `key_file`, if configured.
    pub fn default_key(&self) -> Result<Option<Key>, ClientError> {
        let Some(path) = &self.key_file else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(path).map_err(|source| ClientError::KeyFile {
            path: path.clone(),
            source,
        })?;
        Ok(Some(Key::from_private_pem(&text)?))
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> ClientConfig {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

/// Apply overrides from `lookup` (the process environment in [`load`]).
pub fn apply_env(c: &mut ClientConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(s) = lookup("NDN_FORWARDER_ADDR") {
        c.forwarder_addr = s;
    }
    if let Some(ms) = lookup("NDN_RUN_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
        c.run_timeout_ms = ms;
    }
    if let Some(ms) = lookup("NDN_TICK_INTERVAL_MS").and_then(|s| s.parse().ok()) {
        c.tick_interval_ms = ms;
    }
    if let Some(s) = lookup("NDN_KEY_FILE") {
        c.key_file = Some(PathBuf::from(s));
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/ndn/client.toml"));
    }
    out.push(PathBuf::from("/etc/ndn/client.toml"));
    out
}

fn load_file() -> Option<ClientConfig> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    read(&path)
}

/// Parse one config file. Unreadable or invalid files yield `None`.
pub fn read(path: &Path) -> Option<ClientConfig> {
    let s = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<ClientConfig>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config file");
            None
        }
    }
}
