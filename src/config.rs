//! Service configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "etc/ipgeo.yaml";

/// Default UTC refresh schedule: daily at 03:00.
pub const DEFAULT_SYNC_CRON: &str = "0 0 3 * * *";

/// Default validation probe address.
pub const DEFAULT_PROBE_IP: &str = "10.0.0.1";

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name; prefixes rate-limit keys
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub data_sync: DataSyncConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Counter store for an embedder-supplied rate limiter
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Offline database synchronisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSyncConfig {
    /// Where the zipped database is downloaded from
    pub download_url: String,
    /// UTC cron expression driving refreshes
    #[serde(default = "default_sync_cron")]
    pub sync_cron: String,
    /// Refresh on a fixed interval instead of the cron schedule
    #[serde(default)]
    pub for_test: bool,
    /// Interval used when `for_test` is set
    #[serde(default)]
    pub refresh_interval_secs: u64,
    /// Scratch directory for downloaded and extracted files
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Address looked up to validate a freshly decoded database
    #[serde(default = "default_probe_ip")]
    pub probe_ip: String,
}

/// Request limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Parsed for compatibility; no limiter consults it.
    #[serde(default)]
    pub global_limit: u64,
    /// Requests allowed per client IP; 0 disables per-IP limiting
    #[serde(default)]
    pub limit_per_ip: u64,
}

/// Connection settings for the rate limiter's counter store.
///
/// No store client ships with this crate. An embedder reads these fields
/// when it builds the [`RateLimiter`](crate::ratelimit::RateLimiter) it
/// passes to [`IpRateLimit::from_config`](crate::ratelimit::IpRateLimit::from_config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `host:port` of the store
    pub host: String,
    /// Never logged.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_name() -> String {
    "ipgeo-api".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_sync_cron() -> String {
    DEFAULT_SYNC_CRON.to_string()
}

fn default_probe_ip() -> String {
    DEFAULT_PROBE_IP.to_string()
}

impl DataSyncConfig {
    /// Config pointing at `download_url` with default schedule and probe.
    pub fn new(download_url: impl Into<String>) -> Self {
        Self {
            download_url: download_url.into(),
            sync_cron: default_sync_cron(),
            for_test: false,
            refresh_interval_secs: 0,
            temp_dir: None,
            probe_ip: default_probe_ip(),
        }
    }
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component could work with.
    pub fn validate(&self) -> Result<()> {
        if self.data_sync.download_url.trim().is_empty() {
            return Err(Error::Config("data_sync.download_url is empty".to_string()));
        }
        if self
            .data_sync
            .probe_ip
            .parse::<std::net::Ipv4Addr>()
            .is_err()
        {
            return Err(Error::Config(format!(
                "data_sync.probe_ip is not an IPv4 address: {}",
                self.data_sync.probe_ip
            )));
        }
        if self.rate_limit.global_limit > 0 {
            log::warn!("rate_limit.global_limit is set but not enforced");
        }
        Ok(())
    }

    /// `host:port` listen address.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
