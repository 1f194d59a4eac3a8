//! Store configuration.
//!
//! Loaded from TOML. Option names are snake_case; the camelCase spellings
//! (`debounceMs`, `quotaWarnPercent`, ...) are accepted as aliases.
//!
//! ```
//! use tasklist_store::StoreConfig;
//!
//! let config = StoreConfig::from_toml_str(r#"
//!     namespace = "todo"
//!     debounce_ms = 500
//!     quotaWarnPercent = 75
//! "#).unwrap();
//!
//! assert_eq!(config.debounce_ms, 500);
//! assert_eq!(config.quota_warn_percent, 75.0);
//! assert_eq!(config.quota_critical_percent, 90.0);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fallback::DEFAULT_REPROBE_INTERVAL_MS;
use crate::key::Namespace;
use crate::quota::{DEFAULT_BYTES_PER_CHAR, DEFAULT_QUOTA_CEILING_BYTES};

/// The namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "app-namespace";

/// Error loading or validating a [`StoreConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config.{field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Configuration for [`PersistentStore`](crate::PersistentStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Application namespace prefixed to every key.
    pub namespace: String,
    /// Quiet period before a write reaches the backend. `0` writes through.
    #[serde(alias = "debounceMs")]
    pub debounce_ms: u64,
    /// Usage percentage at which pruning starts.
    #[serde(alias = "quotaWarnPercent")]
    pub quota_warn_percent: f64,
    /// Usage percentage still considered critical after pruning.
    #[serde(alias = "quotaCriticalPercent")]
    pub quota_critical_percent: f64,
    /// Fraction of prunable entries removed per pruning pass.
    #[serde(alias = "pruneFraction")]
    pub prune_fraction: f64,
    /// Interval between availability probes while in fallback mode.
    #[serde(alias = "reprobeIntervalMs")]
    pub reprobe_interval_ms: u64,
    /// Assumed capacity of the storage area.
    #[serde(alias = "quotaCeilingBytes")]
    pub quota_ceiling_bytes: u64,
    #[serde(alias = "bytesPerChar")]
    pub bytes_per_char: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            debounce_ms: 300,
            quota_warn_percent: 80.0,
            quota_critical_percent: 90.0,
            prune_fraction: 0.25,
            reprobe_interval_ms: DEFAULT_REPROBE_INTERVAL_MS,
            quota_ceiling_bytes: DEFAULT_QUOTA_CEILING_BYTES,
            bytes_per_char: DEFAULT_BYTES_PER_CHAR,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document. Missing options take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.namespace.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, message: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                message: message.into(),
            })
        }

        if self.namespace.is_empty() {
            return invalid("namespace", "must not be empty");
        }
        for (field, value) in [
            ("quota_warn_percent", self.quota_warn_percent),
            ("quota_critical_percent", self.quota_critical_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return invalid(field, format!("must be in (0, 100], got {value}"));
            }
        }
        if self.quota_warn_percent > self.quota_critical_percent {
            return invalid(
                "quota_warn_percent",
                format!(
                    "must not exceed quota_critical_percent ({} > {})",
                    self.quota_warn_percent, self.quota_critical_percent
                ),
            );
        }
        if !self.prune_fraction.is_finite() || self.prune_fraction < 0.0 {
            return invalid("prune_fraction", format!("must be a non-negative number, got {}", self.prune_fraction));
        }
        if self.quota_ceiling_bytes == 0 {
            return invalid("quota_ceiling_bytes", "must be > 0");
        }
        if self.bytes_per_char == 0 {
            return invalid("bytes_per_char", "must be > 0");
        }
        Ok(())
    }
}
