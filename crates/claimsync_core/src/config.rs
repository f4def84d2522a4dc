//! Runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the
//! store, intake and dispatcher. Request handling and sync cycles never read
//! process environment themselves.

use crate::logging::default_log_level;
use crate::service::intake_service::DEFAULT_PAYER_ENDPOINT;
use crate::sync::dispatcher::{
    DeferralPolicy, SyncOptions, DEFAULT_CLAIM_TTL, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_MAX_BATCH,
};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "CLAIMSYNC_DB_PATH";
pub const ENV_MAX_BATCH: &str = "CLAIMSYNC_MAX_BATCH";
pub const ENV_DELIVERY_TIMEOUT_MS: &str = "CLAIMSYNC_DELIVERY_TIMEOUT_MS";
pub const ENV_DEFERRAL_POLICY: &str = "CLAIMSYNC_DEFERRAL_POLICY";
pub const ENV_CLAIM_TTL_MS: &str = "CLAIMSYNC_CLAIM_TTL_MS";
pub const ENV_DEFAULT_DESTINATION: &str = "CLAIMSYNC_DEFAULT_DESTINATION";
pub const ENV_LOG_LEVEL: &str = "CLAIMSYNC_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "CLAIMSYNC_LOG_DIR";

const DEFAULT_DB_FILE_NAME: &str = "claimsync.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "invalid value `{value}` for {key}"),
        }
    }
}

impl Error for ConfigError {}

/// Process-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub max_batch: u32,
    pub delivery_timeout: Duration,
    pub deferral_policy: DeferralPolicy,
    /// Age after which another cycle's ledger claim is treated as abandoned.
    pub claim_ttl: Duration,
    pub default_destination: String,
    pub log_level: String,
    /// Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            max_batch: DEFAULT_MAX_BATCH,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            deferral_policy: DeferralPolicy::default(),
            claim_ttl: DEFAULT_CLAIM_TTL,
            default_destination: DEFAULT_PAYER_ENDPOINT.to_string(),
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl SyncConfig {
    /// Reads `CLAIMSYNC_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(value) = get(ENV_DB_PATH) {
            config.db_path = PathBuf::from(value);
        }
        if let Some(value) = get(ENV_MAX_BATCH) {
            config.max_batch = value
                .parse::<u32>()
                .ok()
                .filter(|parsed| *parsed > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: ENV_MAX_BATCH,
                    value,
                })?;
        }
        if let Some(value) = get(ENV_DELIVERY_TIMEOUT_MS) {
            let millis = value
                .parse::<u64>()
                .ok()
                .filter(|parsed| *parsed > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: ENV_DELIVERY_TIMEOUT_MS,
                    value,
                })?;
            config.delivery_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = get(ENV_DEFERRAL_POLICY) {
            config.deferral_policy =
                DeferralPolicy::parse(&value).ok_or(ConfigError::InvalidValue {
                    key: ENV_DEFERRAL_POLICY,
                    value,
                })?;
        }
        if let Some(value) = get(ENV_CLAIM_TTL_MS) {
            let millis = value
                .parse::<u64>()
                .ok()
                .filter(|parsed| *parsed > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: ENV_CLAIM_TTL_MS,
                    value,
                })?;
            config.claim_ttl = Duration::from_millis(millis);
        }
        if let Some(value) = get(ENV_DEFAULT_DESTINATION) {
            config.default_destination = value;
        }
        if let Some(value) = get(ENV_LOG_LEVEL) {
            config.log_level = value;
        }
        if let Some(value) = get(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    /// Dispatcher options derived from this configuration.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_batch: self.max_batch,
            delivery_timeout: self.delivery_timeout,
            deferral_policy: self.deferral_policy,
            claim_ttl: self.claim_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, SyncConfig, ENV_DEFERRAL_POLICY, ENV_MAX_BATCH};
    use crate::sync::dispatcher::DeferralPolicy;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.max_batch, 50);
        assert_eq!(config.delivery_timeout, Duration::from_secs(10));
        assert_eq!(config.default_destination, "https://api.hcx.gov.in/submit");
    }

    #[test]
    fn overrides_are_applied() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("CLAIMSYNC_DB_PATH", "/var/lib/claimsync/queue.db"),
            ("CLAIMSYNC_MAX_BATCH", "5"),
            ("CLAIMSYNC_DELIVERY_TIMEOUT_MS", "2500"),
            ("CLAIMSYNC_DEFERRAL_POLICY", "halt-destination"),
            ("CLAIMSYNC_CLAIM_TTL_MS", "60000"),
            ("CLAIMSYNC_LOG_DIR", "  "),
        ]))
        .unwrap();

        assert_eq!(config.max_batch, 5);
        assert_eq!(config.delivery_timeout, Duration::from_millis(2500));
        assert_eq!(config.deferral_policy, DeferralPolicy::HaltDestination);
        assert!(config.log_dir.is_none());
        assert_eq!(config.sync_options().max_batch, 5);
        assert_eq!(config.sync_options().claim_ttl, Duration::from_secs(60));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_batch = SyncConfig::from_lookup(lookup(&[("CLAIMSYNC_MAX_BATCH", "0")]));
        assert_eq!(
            zero_batch,
            Err(ConfigError::InvalidValue {
                key: ENV_MAX_BATCH,
                value: "0".to_string()
            })
        );

        let policy = SyncConfig::from_lookup(lookup(&[("CLAIMSYNC_DEFERRAL_POLICY", "skip")]));
        assert!(matches!(
            policy,
            Err(ConfigError::InvalidValue {
                key: ENV_DEFERRAL_POLICY,
                ..
            })
        ));
    }
}
