//! Runtime settings for the inventory services.
//!
//! Loaded in layers:
//! 1. Defaults in code
//! 2. Optional `stockyard.toml` (or the file named by `STOCKYARD_CONFIG`)
//! 3. `STOCKYARD_*` environment variables (a `.env` file is read first if present)

use std::path::PathBuf;
use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct InventorySettings {
    /// Upper bound on waiting for ledger locks before a unit of work gives up with `Busy`.
    pub lock_timeout_ms: u64,

    /// Directory proof files are written to by the filesystem proof storage.
    pub proof_dir: PathBuf,

    /// Postgres connection URL. In-memory storage is used when absent.
    pub database_url: Option<String>,

    /// Maximum number of connections in the pool.
    pub database_max_connections: u32,

    /// `tracing` filter directive used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2000,
            proof_dir: PathBuf::from("./proofs"),
            database_url: None,
            database_max_connections: 5,
            log_filter: "info".to_string(),
        }
    }
}

impl InventorySettings {
    /// Load settings from `.env`, the config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let file = std::env::var("STOCKYARD_CONFIG").unwrap_or_else(|_| "stockyard".into());
        Self::load_from(
            File::with_name(&file).required(false),
            Environment::with_prefix("STOCKYARD").try_parsing(true),
        )
    }

    /// Build settings from explicit sources (used by `load` and by tests).
    pub fn load_from<F, E>(file: F, env: E) -> Result<Self, ConfigError>
    where
        F: config::Source + Send + Sync + 'static,
        E: config::Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        config::Config::builder()
            .set_default("lock_timeout_ms", defaults.lock_timeout_ms)?
            .set_default("proof_dir", defaults.proof_dir.to_string_lossy().into_owned())?
            .set_default("database_max_connections", defaults.database_max_connections)?
            .set_default("log_filter", defaults.log_filter)?
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
