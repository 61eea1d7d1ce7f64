//! Workspace configuration loaded from TOML.
//!
//! Every section is optional; a missing file section falls back to defaults.
//!
//! ```toml
//! [store]
//! data_dir = "historical_data"
//!
//! [provider]
//! api_key = "..."          # or GOLDLAB_API_KEY
//!
//! [heal]
//! companies = ["sjc", "doji"]
//! ```

use goldlab_core::data::{Normalizer, VnAppMobSettings, DEFAULT_BASE_URL};
use goldlab_core::domain::Company;
use goldlab_core::{CsvRecordStore, HealConfig, MergePolicy, Reconciler, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `provider.api_key`.
pub const API_KEY_ENV: &str = "GOLDLAB_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub file_name: String,
    pub keep_backup: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("historical_data"),
            file_name: "historical_gold_prices.csv".into(),
            keep_backup: true,
        }
    }
}

impl StoreConfig {
    pub fn path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    pub fn open(&self) -> CsvRecordStore {
        CsvRecordStore::in_dir(&self.data_dir, &self.file_name).with_backup(self.keep_backup)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub utc_offset_hours: i32,
    /// Pause between per-company requests.
    pub request_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            timeout_secs: 30,
            utc_offset_hours: 7,
            request_delay_ms: 1000,
            max_retries: 3,
        }
    }
}

impl ProviderConfig {
    pub fn settings(&self) -> VnAppMobSettings {
        VnAppMobSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            utc_offset_hours: self.utc_offset_hours,
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// `None` keeps every year.
    pub min_year: Option<i32>,
    pub policy: MergePolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_year: RetentionPolicy::default().min_year,
            policy: MergePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
    pub tracked_fields: Vec<String>,
    pub heal_on_start: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            initial_delay_secs: 5,
            tracked_fields: ["buy_1l", "sell_1l", "buy_nhan1c", "sell_nhan1c"]
                .into_iter()
                .map(String::from)
                .collect(),
            heal_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldlabConfig {
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub reconcile: ReconcileConfig,
    pub heal: HealConfig,
    pub poll: PollConfig,
}

impl GoldlabConfig {
    /// Load from a TOML file, apply environment overrides, and validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string. No env overrides, no validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.provider.api_key = Some(key.trim().to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.to_string()))
        };
        if self.store.file_name.trim().is_empty() {
            return invalid("store.file_name must not be empty");
        }
        if self.provider.timeout_secs == 0 {
            return invalid("provider.timeout_secs must be positive");
        }
        if !(-12..=14).contains(&self.provider.utc_offset_hours) {
            return invalid("provider.utc_offset_hours must be between -12 and 14");
        }
        if self.heal.lookback_days <= 0 || self.heal.min_window_days <= 0 {
            return invalid("heal.lookback_days and heal.min_window_days must be positive");
        }
        if self.heal.buffer_days < 0 {
            return invalid("heal.buffer_days must not be negative");
        }
        if self.heal.companies.is_empty() {
            return invalid("heal.companies must name at least one company");
        }
        if self.heal.publish_hour > 23 {
            return invalid("heal.publish_hour must be between 0 and 23");
        }
        if self.poll.interval_secs == 0 {
            return invalid("poll.interval_secs must be positive");
        }
        if self.poll.tracked_fields.is_empty() {
            return invalid("poll.tracked_fields must name at least one field");
        }
        Ok(())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.reconcile.policy,
            RetentionPolicy {
                min_year: self.reconcile.min_year,
            },
        )
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::with_utc_offset_hours(self.provider.utc_offset_hours).unwrap_or_default()
    }

    pub fn companies(&self) -> &[Company] {
        &self.heal.companies
    }
}
