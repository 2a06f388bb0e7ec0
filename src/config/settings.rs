//! Settings loading from the TOML settings file.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! The file location comes from `VOUCHER_DESK_CONFIG` and falls back to
//! `./config.toml`.

use crate::core::resilience::{Quota, QuotaTable, RetryPolicy};
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "config.toml";

/// Configuration structure representing the entire settings file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub issuance: IssuanceSettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub catalog: CatalogSettings,
}

/// Issuance flow knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IssuanceSettings {
    /// Fresh code draws allowed before `CodeGenerationExhausted`
    pub code_attempts: u32,
}

impl Default for IssuanceSettings {
    fn default() -> Self {
        Self { code_attempts: 5 }
    }
}

/// Retry policy for transient read failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

/// Read quota applied per identity and operation
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuotaSettings {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    /// Overrides keyed by operation name, e.g. `list_vouchers`
    pub operations: HashMap<String, QuotaSettings>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
            operations: HashMap::new(),
        }
    }
}

/// Catalog seed for the in-memory catalog used by the console binary
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub books: Vec<BookSettings>,
    pub series: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookSettings {
    pub id: String,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Settings {
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    #[must_use]
    pub fn quotas(&self) -> QuotaTable {
        let default = Quota::new(
            self.rate_limit.max_requests,
            Duration::from_secs(self.rate_limit.window_secs),
        );
        self.rate_limit
            .operations
            .iter()
            .fold(QuotaTable::new(default), |table, (operation, quota)| {
                table.with_operation(
                    operation.clone(),
                    Quota::new(quota.max_requests, Duration::from_secs(quota.window_secs)),
                )
            })
    }
}

/// Loads settings from a TOML file; a missing file yields defaults.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!(path = %path.display(), "Settings file not found, using defaults");
        return Ok(Settings::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("Failed to read settings file {}: {e}", path.display()),
    })?;

    parse_settings(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse settings file {}: {e}", path.display()),
    })
}

fn parse_settings(contents: &str) -> std::result::Result<Settings, toml::de::Error> {
    toml::from_str(contents)
}

/// Loads settings from `VOUCHER_DESK_CONFIG`, or `./config.toml` when unset.
pub fn load_default_settings() -> Result<Settings> {
    let path = std::env::var("VOUCHER_DESK_CONFIG")
        .unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    load_settings(path)
}
