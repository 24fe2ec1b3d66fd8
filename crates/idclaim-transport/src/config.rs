//! Invoker configuration, read from TOML.
//!
//! ```toml
//! mode = "async"
//! store_path = "/var/lib/idclaim/store.jsonl"
//! max_range_len = 65536
//!
//! [reconciler]
//! queue_depth = 256
//! retry_initial_ms = 100
//! retry_max_ms = 10000
//! max_attempts = 8
//! expiry_sweep_secs = 30
//! ```

use idclaim_engine::{DEFAULT_MAX_RANGE_LEN, Engine};
use idclaim_store::SharedStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokerMode {
    /// Allocation runs inside the create/update/delete call.
    #[default]
    Sync,
    /// Create/update/delete persist and return; a reconciler allocates.
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InvokerConfig {
    pub mode: InvokerMode,
    /// JSONL store file; in-memory when unset.
    pub store_path: Option<PathBuf>,
    /// Most positions one range claim may hold.
    pub max_range_len: u64,
    pub reconciler: ReconcilerConfig,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            mode: InvokerMode::default(),
            store_path: None,
            max_range_len: DEFAULT_MAX_RANGE_LEN,
            reconciler: ReconcilerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    pub queue_depth: usize,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub max_attempts: u32,
    pub expiry_sweep_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            retry_initial_ms: 100,
            retry_max_ms: 10_000,
            max_attempts: 8,
            expiry_sweep_secs: 30,
        }
    }
}

impl ReconcilerConfig {
    /// Delay before retry number `attempt` (1-based): doubles from
    /// `retry_initial_ms`, capped at `retry_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .retry_initial_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_ms);
        Duration::from_millis(delay)
    }

    pub fn expiry_sweep(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_secs)
    }
}

impl InvokerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_range_len == 0 {
            return Err(ConfigError::Invalid(
                "max_range_len must be at least 1".to_string(),
            ));
        }
        let reconciler = &self.reconciler;
        if reconciler.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.queue_depth must be at least 1".to_string(),
            ));
        }
        if reconciler.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.max_attempts must be at least 1".to_string(),
            ));
        }
        if reconciler.retry_initial_ms > reconciler.retry_max_ms {
            return Err(ConfigError::Invalid(format!(
                "reconciler.retry_initial_ms ({}) exceeds retry_max_ms ({})",
                reconciler.retry_initial_ms, reconciler.retry_max_ms
            )));
        }
        if reconciler.expiry_sweep_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.expiry_sweep_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn open_store(&self) -> SharedStore {
        match &self.store_path {
            Some(path) => SharedStore::jsonl(path),
            None => SharedStore::in_memory(),
        }
    }

    /// Engine over a freshly opened store, with this config's limits.
    pub fn open_engine(&self) -> Engine {
        Engine::new(Arc::new(self.open_store())).with_max_range_len(self.max_range_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = InvokerConfig::from_toml_str("").expect("empty config is valid");
        assert_eq!(config, InvokerConfig::default());
        assert_eq!(config.mode, InvokerMode::Sync);
        assert!(config.open_store().path().is_none());
    }

    #[test]
    fn partial_reconciler_table_keeps_other_defaults() {
        let config = InvokerConfig::from_toml_str(
            r#"
            mode = "async"
            store_path = "state/store.jsonl"

            [reconciler]
            max_attempts = 3
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.mode, InvokerMode::Async);
        assert_eq!(config.reconciler.max_attempts, 3);
        assert_eq!(config.reconciler.queue_depth, 256);
        assert_eq!(config.max_range_len, DEFAULT_MAX_RANGE_LEN);
        assert_eq!(
            config.open_store().path(),
            Some(Path::new("state/store.jsonl"))
        );
    }

    #[test]
    fn range_limit_reaches_the_engine() {
        let config = InvokerConfig::from_toml_str("max_range_len = 8\n").expect("config should parse");
        assert_eq!(config.open_engine().max_range_len(), 8);

        let err = InvokerConfig::from_toml_str("max_range_len = 0\n").expect_err("zero is invalid");
        assert!(err.to_string().contains("max_range_len"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = InvokerConfig::from_toml_str("mood = \"async\"").expect_err("typo must fail");
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn inconsistent_retry_window_is_rejected() {
        let err = InvokerConfig::from_toml_str(
            "[reconciler]\nretry_initial_ms = 500\nretry_max_ms = 100\n",
        )
        .expect_err("initial above max must fail");
        assert!(err.to_string().contains("retry_initial_ms"));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let config = ReconcilerConfig {
            retry_initial_ms: 100,
            retry_max_ms: 1_000,
            ..ReconcilerConfig::default()
        };
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| config.backoff(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }
}
