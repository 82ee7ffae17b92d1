//! Daemon Configuration
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./netlab.yaml` (current directory - highest priority)
//! 2. `~/.config/netlab/netlab.yaml` (user config directory)
//! 3. `/etc/netlab/netlab.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority
//! files.
//!
//! # YAML Structure
//!
//! ```yaml
//! daemon:
//!   listen_addr: "0.0.0.0"
//!   port: 4038
//!   mac_prefix: "00:16:3e:00:00:00"
//! retry:
//!   max_retries: 5
//!   base_interval_ms: 1000
//! servers:
//!   - name: core2
//!     host: "10.0.0.2"
//! ```

use crate::channel::RetryPolicy;
use crate::model::{MacAddr, DEFAULT_MAC_SEED};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "netlab.yaml";

/// Default control-channel port.
pub const DEFAULT_PORT: u16 = 4038;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid mac_prefix '{0}'")]
    BadMacPrefix(String),
}

/// Daemon listener and allocation settings (`daemon.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address to listen on (`daemon.listen_addr`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,

    /// Control-channel port (`daemon.port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// MAC allocation prefix (`daemon.mac_prefix`), colon-separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_prefix: Option<String>,

    /// Per-channel undecoded-byte cap (`daemon.max_backlog`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backlog: Option<usize>,
}

impl DaemonConfig {
    /// Listen address, defaulting to all interfaces.
    pub fn listen_addr(&self) -> &str {
        self.listen_addr.as_deref().unwrap_or("0.0.0.0")
    }

    /// Listen port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr(), self.port())
    }

    /// MAC allocation seed derived from the configured prefix.
    pub fn mac_seed(&self) -> Result<u64, ConfigError> {
        match &self.mac_prefix {
            Some(prefix) => prefix
                .parse::<MacAddr>()
                .map(|mac| mac.to_u64())
                .map_err(|_| ConfigError::BadMacPrefix(prefix.clone())),
            None => Ok(DEFAULT_MAC_SEED),
        }
    }
}

/// Outbound-connection retry settings (`retry.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_interval_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
}

impl RetryConfig {
    /// Resolve into a concrete policy, filling defaults.
    pub fn to_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            base_interval_ms: self.base_interval_ms.unwrap_or(defaults.base_interval_ms),
            max_backoff_ms: self.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
        }
    }
}

/// A statically configured emulation server (`servers`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Server name, as referenced by node placements.
    pub name: String,

    /// Host to reach the server's daemon on.
    pub host: String,

    /// Daemon port; defaults to the standard control port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ServerConfig {
    /// Endpoint string for connecting to this server.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(DEFAULT_PORT))
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daemon settings (`daemon.*`).
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Retry settings (`retry.*`).
    #[serde(default)]
    pub retry: RetryConfig,

    /// Statically known emulation servers (`servers`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerConfig>,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Files are loaded in reverse priority order and merged. Returns
    /// the merged config plus the paths that were actually loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier
    /// ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to
    /// highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/netlab").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("netlab").join(CONFIG_FILENAME));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when present.
    pub fn merge(&mut self, other: Config) {
        if other.daemon.listen_addr.is_some() {
            self.daemon.listen_addr = other.daemon.listen_addr;
        }
        if other.daemon.port.is_some() {
            self.daemon.port = other.daemon.port;
        }
        if other.daemon.mac_prefix.is_some() {
            self.daemon.mac_prefix = other.daemon.mac_prefix;
        }
        if other.daemon.max_backlog.is_some() {
            self.daemon.max_backlog = other.daemon.max_backlog;
        }
        if other.retry.max_retries.is_some() {
            self.retry.max_retries = other.retry.max_retries;
        }
        if other.retry.base_interval_ms.is_some() {
            self.retry.base_interval_ms = other.retry.base_interval_ms;
        }
        if other.retry.max_backoff_ms.is_some() {
            self.retry.max_backoff_ms = other.retry.max_backoff_ms;
        }
        // Servers replace wholesale when non-empty.
        if !other.servers.is_empty() {
            self.servers = other.servers;
        }
    }

    /// Look up a configured server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::new();
        assert_eq!(config.daemon.listen_addr(), "0.0.0.0");
        assert_eq!(config.daemon.port(), DEFAULT_PORT);
        assert_eq!(config.daemon.bind_addr(), "0.0.0.0:4038");
        assert_eq!(config.daemon.mac_seed().unwrap(), DEFAULT_MAC_SEED);
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_parse_yaml_full() {
        let yaml = r#"
daemon:
  listen_addr: "127.0.0.1"
  port: 4040
  mac_prefix: "02:00:00:00:00:00"
retry:
  max_retries: 3
  base_interval_ms: 500
servers:
  - name: core2
    host: "10.0.0.2"
  - name: core3
    host: "10.0.0.3"
    port: 4041
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.daemon.bind_addr(), "127.0.0.1:4040");
        assert_eq!(config.daemon.mac_seed().unwrap(), 0x020000000000);
        assert_eq!(config.retry.to_policy().max_retries, 3);
        assert_eq!(config.retry.to_policy().base_interval_ms, 500);
        assert_eq!(config.server("core2").unwrap().endpoint(), "10.0.0.2:4038");
        assert_eq!(config.server("core3").unwrap().endpoint(), "10.0.0.3:4041");
        assert!(config.server("core4").is_none());
    }

    #[test]
    fn test_parse_yaml_empty() {
        let config: Config = serde_yaml::from_str("").unwrap();
        assert_eq!(config.daemon.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_bad_mac_prefix_rejected() {
        let config: Config = serde_yaml::from_str("daemon:\n  mac_prefix: \"nope\"\n").unwrap();
        assert!(matches!(
            config.daemon.mac_seed(),
            Err(ConfigError::BadMacPrefix(_))
        ));
    }

    #[test]
    fn test_merge_overrides_when_present() {
        let mut base = Config::new();
        base.daemon.port = Some(4038);
        base.daemon.listen_addr = Some("0.0.0.0".to_string());

        let mut over = Config::new();
        over.daemon.port = Some(5000);

        base.merge(over);
        assert_eq!(base.daemon.port(), 5000);
        // Absent fields keep the base value.
        assert_eq!(base.daemon.listen_addr(), "0.0.0.0");
    }

    #[test]
    fn test_load_from_paths_merges() {
        let temp_dir = TempDir::new().unwrap();
        let low = temp_dir.path().join("low.yaml");
        let high = temp_dir.path().join("high.yaml");

        fs::write(&low, "daemon:\n  port: 4100\n  listen_addr: \"10.0.0.1\"\n").unwrap();
        fs::write(&high, "daemon:\n  port: 4200\n").unwrap();

        let paths = vec![low, high];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(config.daemon.port(), 4200);
        assert_eq!(config.daemon.listen_addr(), "10.0.0.1");
    }

    #[test]
    fn test_load_skips_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("exists.yaml");
        let missing = temp_dir.path().join("missing.yaml");
        fs::write(&existing, "daemon:\n  port: 4300\n").unwrap();

        let paths = vec![missing, existing.clone()];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();
        assert_eq!(loaded, vec![existing]);
        assert_eq!(config.daemon.port(), 4300);
    }

    #[test]
    fn test_search_paths_includes_expected() {
        let paths = Config::search_paths();
        assert!(paths.iter().any(|p| p.ends_with("netlab.yaml")));
        assert!(paths
            .iter()
            .any(|p| p.starts_with("/etc/netlab") && p.ends_with("netlab.yaml")));
    }

    #[test]
    fn test_to_yaml_omits_unset_fields() {
        let config = Config::new();
        let yaml = config.to_yaml().unwrap();
        assert!(!yaml.contains("mac_prefix"));
        assert!(!yaml.contains("servers"));
    }
}
