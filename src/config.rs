//! Relay configuration
//!
//! Loaded once at startup from a YAML file. Everything derived from it (rule
//! sets, backend registry, load balance policy) is immutable afterwards
//! except for the backend firewalled flags.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "RELAYGATE_CONFIG";

/// Environment variable overriding `listen_addr`
pub const LISTEN_ENV: &str = "LISTEN";

const DEFAULT_CONFIG_PATH: &str = "relaygate.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,

    /// `smart`, `roundrobin`, `none` or `index:<N>`
    pub load_balance: String,

    pub connect_timeout_ms: u64,

    /// Time allowed for a client to send its destination header
    pub handshake_timeout_ms: u64,

    pub log_level: String,

    pub target: TargetConfig,

    pub backends: Vec<BackendConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:1080".to_string(),
            load_balance: "smart".to_string(),
            connect_timeout_ms: 5000,
            handshake_timeout_ms: 10_000,
            log_level: "info".to_string(),
            target: TargetConfig::default(),
            backends: Vec::new(),
        }
    }
}

/// Destination filtering rules
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub port: RuleConfig<u16>,
    pub ip: RuleConfig<Ipv4Addr>,
    pub unhandled: UnhandledPolicy,
}

/// Deny/allow lists for one category. `deny: all` blocks everything not in
/// `allowed`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleConfig<T> {
    pub deny: String,
    pub denied: Vec<T>,
    pub allowed: Vec<T>,
}

impl<T> Default for RuleConfig<T> {
    fn default() -> Self {
        Self {
            deny: String::new(),
            denied: Vec::new(),
            allowed: Vec::new(),
        }
    }
}

impl<T> RuleConfig<T> {
    pub fn deny_all(&self) -> bool {
        self.deny == "all"
    }
}

/// What to do with destinations the filter has no rules for (IPv6, domain).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhandledPolicy {
    #[default]
    Deny,
    Pass,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub addrs: Vec<Ipv4Addr>,
    pub port: u16,
}

impl Config {
    /// Load from the file named by `RELAYGATE_CONFIG` (default
    /// `relaygate.yaml`). A missing file gives the defaults. `LISTEN`
    /// overrides the listen address either way.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut cfg = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        if let Ok(listen_addr) = std::env::var(LISTEN_ENV) {
            cfg.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse YAML config")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Parsed `log_level`, falling back to INFO
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}
