//! Node configuration

use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

/// Layered runtime configuration: defaults, then an optional TOML file,
/// then `ATGRAPH_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Sled database directory
    pub db_path: String,
    /// Directory-service base URL
    pub directory_host: String,
    pub http_timeout_secs: u64,
    /// Export-feed page size
    pub page_size: usize,
    /// Handle re-verification batch size
    pub batch_size: usize,
    /// Shared outbound-call quota
    pub calls_per_second: u32,
    pub call_burst: u32,
    /// Retry bound for DNS and directory lookups
    pub max_attempts: u32,
    /// Retry bound for the well-known endpoint
    pub well_known_attempts: u32,
    /// Handles under this suffix skip the DNS source
    pub platform_suffix: String,
    pub lease_ttl_secs: i64,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: "data/atgraph".to_string(),
            directory_host: "https://plc.directory".to_string(),
            http_timeout_secs: 10,
            page_size: 1000,
            batch_size: 1000,
            calls_per_second: 20,
            call_burst: 40,
            max_attempts: 3,
            well_known_attempts: 5,
            platform_suffix: ".bsky.social".to_string(),
            lease_ttl_secs: 1800,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix("ATGRAPH").try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
