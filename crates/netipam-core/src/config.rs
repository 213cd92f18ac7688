use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ipam: IpamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Address-management policy passed explicitly into validation and
/// hierarchy maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Reject duplicate prefixes and addresses in the global table
    #[serde(default)]
    pub enforce_global_unique: bool,
    /// Number of hierarchy updates written per batch during a rebuild
    #[serde(default = "default_rebuild_batch_size")]
    pub rebuild_batch_size: usize,
    #[serde(default = "default_utilization_cache_size")]
    pub utilization_cache_size: usize,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            enforce_global_unique: false,
            rebuild_batch_size: default_rebuild_batch_size(),
            utilization_cache_size: default_utilization_cache_size(),
        }
    }
}

// Default value functions
fn default_db_path() -> PathBuf {
    PathBuf::from("/data/netipam.redb")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_rebuild_batch_size() -> usize {
    100
}
fn default_utilization_cache_size() -> usize {
    10000
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::Error::Config(format!("failed to parse config: {e}")))?;
        if config.ipam.rebuild_batch_size == 0 {
            return Err(crate::error::Error::Config(
                "ipam.rebuild_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
