use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub dht: DhtConfig,
    pub storage: StorageConfig,
    pub metadata: MetadataConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct DhtConfig {
    pub bind: String,
    pub port: u16,
    /// Pause between maintenance ticks.
    pub interval_ms: u64,
    pub bootstrap_nodes: Vec<String>,
    /// Hex node id; a random one is generated when unset.
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    pub db_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct MetadataConfig {
    pub connect_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub max_metadata_bytes: usize,
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dht: DhtConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 6881,
            interval_ms: 50,
            bootstrap_nodes: vec![
                "router.bittorrent.com:6881".to_string(),
                "dht.transmissionbt.com:6881".to_string(),
                "router.utorrent.com:6881".to_string(),
            ],
            node_id: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite://data/grapefruit.db".to_string(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            fetch_timeout_ms: 15000,
            max_metadata_bytes: 10 * 1024 * 1024,
            max_concurrent_fetches: 128,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            json: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1".to_string(),
            port: 9100,
        }
    }
}
