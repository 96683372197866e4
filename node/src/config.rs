//! # Node Configuration
//!
//! Runtime settings read from a JSON file (`config.json` by default), with a
//! handful of CLI/env overrides applied on top in `main`. Every field has a
//! default, so an empty object `{}` is a valid configuration.
//!
//! ```json
//! {
//!   "database": { "path": "./data/ledger", "cacheCapacityBytes": 67108864 },
//!   "http": { "listen": "0.0.0.0:8080", "metricsListen": "0.0.0.0:9090" },
//!   "requestTimeoutMs": 5000,
//!   "hashCost": 10,
//!   "settlement": { "enabled": true, "intervalSecs": 60, "batchSize": 100 },
//!   "log": { "format": "json", "filter": "bank_node=info,bank_ledger=info" }
//! }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use bank_ledger::config::{
    DEFAULT_HASH_COST, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SETTLEMENT_BATCH,
    DEFAULT_SETTLEMENT_INTERVAL, MAX_HASH_COST, MIN_HASH_COST,
};
use bank_ledger::SledConfig;

use crate::logging::{LogFormat, DEFAULT_FILTER};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub request_timeout_ms: u64,
    pub hash_cost: u32,
    pub settlement: SettlementConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub cache_capacity_bytes: u64,
    /// `null` turns off sled's background flusher.
    pub flush_every_ms: Option<u64>,
    /// Flush to disk before acknowledging each write.
    pub sync_commits: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpConfig {
    pub listen: SocketAddr,
    pub metrics_listen: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SettlementConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
    pub filter: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            hash_cost: DEFAULT_HASH_COST,
            settlement: SettlementConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let sled = SledConfig::new("./data/ledger");
        Self {
            path: sled.path,
            cache_capacity_bytes: sled.cache_capacity,
            flush_every_ms: sled.flush_every_ms,
            sync_commits: sled.sync_commits,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_listen: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_SETTLEMENT_INTERVAL.as_secs(),
            batch_size: DEFAULT_SETTLEMENT_BATCH,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: DEFAULT_FILTER.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl NodeConfig {
    /// Reads and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise falls back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&self.hash_cost) {
            bail!(
                "hashCost must be between {} and {}, got {}",
                MIN_HASH_COST,
                MAX_HASH_COST,
                self.hash_cost
            );
        }
        if self.request_timeout_ms == 0 {
            bail!("requestTimeoutMs must be positive");
        }
        if self.settlement.enabled && self.settlement.interval_secs == 0 {
            bail!("settlement.intervalSecs must be positive when settlement is enabled");
        }
        if self.settlement.batch_size == 0 {
            bail!("settlement.batchSize must be positive");
        }
        if self.http.listen == self.http.metrics_listen {
            bail!("http.listen and http.metricsListen must differ");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn settlement_interval(&self) -> Duration {
        Duration::from_secs(self.settlement.interval_secs)
    }

    pub fn sled_config(&self) -> SledConfig {
        SledConfig {
            path: self.database.path.clone(),
            cache_capacity: self.database.cache_capacity_bytes,
            flush_every_ms: self.database.flush_every_ms,
            sync_commits: self.database.sync_commits,
        }
    }
}
