/// Database configuration
use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    #[serde(default = "default_storage")]
    pub storage: StorageSettings,

    #[serde(default = "default_workers")]
    pub workers: WorkerSettings,

    #[serde(default = "default_watcher")]
    pub watcher: WatcherSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    /// JSON database file; no persistence when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Write the database once more during shutdown if it is dirty
    #[serde(default = "default_save_on_shutdown")]
    pub save_on_shutdown: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    /// How long a worker blocks on the action queue before checking for exit
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,

    /// Time budget of one event-drain pass on the mutating thread
    #[serde(default = "default_poll_budget_ms")]
    pub poll_budget_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// File extensions the watcher reports (lowercase, without dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl DbConfig {
    /// Load configuration from an optional TOML file and the environment
    ///
    /// Environment variables are prefixed with `SOUL_DB_` and use `__` between
    /// sections, e.g. `SOUL_DB_WORKERS__POLL_BUDGET_MS=5`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = path {
            if path.exists() {
                settings = settings.add_source(config::File::from(path.to_path_buf()));
            }
        }

        settings = settings.add_source(
            config::Environment::with_prefix("SOUL_DB")
                .separator("__")
                .try_parsing(true),
        );

        let config = settings
            .build()
            .map_err(|e| DbError::Config(e.to_string()))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| DbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers.pop_timeout_ms == 0 {
            return Err(DbError::Config(
                "workers.pop_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.workers.poll_budget_ms == 0 {
            return Err(DbError::Config(
                "workers.poll_budget_ms must be greater than zero".to_string(),
            ));
        }

        if self.watcher.extensions.is_empty() {
            return Err(DbError::Config(
                "watcher.extensions must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration persisting to `path`
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.database_path = Some(path.into());
        self
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.workers.pop_timeout_ms)
    }

    pub fn poll_budget(&self) -> Duration {
        Duration::from_millis(self.workers.poll_budget_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watcher.debounce_ms)
    }
}

// Default values
fn default_storage() -> StorageSettings {
    StorageSettings {
        database_path: None,
        save_on_shutdown: default_save_on_shutdown(),
    }
}

fn default_save_on_shutdown() -> bool {
    true
}

fn default_workers() -> WorkerSettings {
    WorkerSettings {
        pop_timeout_ms: default_pop_timeout_ms(),
        poll_budget_ms: default_poll_budget_ms(),
    }
}

fn default_pop_timeout_ms() -> u64 {
    1000
}

fn default_poll_budget_ms() -> u64 {
    20
}

fn default_watcher() -> WatcherSettings {
    WatcherSettings {
        debounce_ms: default_debounce_ms(),
        extensions: default_extensions(),
    }
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_extensions() -> Vec<String> {
    ["mp3", "flac", "ogg", "opus", "wav", "m4a", "aac", "aif", "aiff"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            storage: default_storage(),
            workers: default_workers(),
            watcher: default_watcher(),
        }
    }
}
