//! Runtime tuning for the card store and its background tasks.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - Debounce and poll intervals are strictly positive.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_AUTOSAVE_DEBOUNCE_MS: i64 = 500;
pub const DEFAULT_POLL_INTERVAL_MS: i64 = 2_000;
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 200;

/// Store/vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Quiet period after the last edit before autosave commits.
    pub autosave_debounce_ms: i64,
    /// Interval between external-change polls.
    pub poll_interval_ms: i64,
    /// Character budget for plain-text previews.
    pub preview_max_chars: usize,
    /// Strip a deleted card's id from every referrer's links.
    pub cascade_delete_links: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: DEFAULT_AUTOSAVE_DEBOUNCE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            preview_max_chars: DEFAULT_PREVIEW_MAX_CHARS,
            cascade_delete_links: false,
        }
    }
}

/// Configuration parse/validation failure.
#[derive(Debug)]
pub enum ConfigError {
    Json(serde_json::Error),
    InvalidValue {
        field: &'static str,
        value: i64,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid store config json: {err}"),
            Self::InvalidValue { field, value } => {
                write!(f, "store config `{field}` must be > 0, got {value}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl StoreConfig {
    /// Parses a JSON config object; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.autosave_debounce_ms <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "autosave_debounce_ms",
                value: self.autosave_debounce_ms,
            });
        }
        if self.poll_interval_ms <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                value: self.poll_interval_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, StoreConfig};

    #[test]
    fn empty_object_yields_defaults() {
        let config = StoreConfig::from_json_str("{}").expect("defaults should parse");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.autosave_debounce_ms, 500);
    }

    #[test]
    fn partial_object_overrides_only_given_fields() {
        let config = StoreConfig::from_json_str(r#"{"poll_interval_ms": 10000}"#)
            .expect("partial config should parse");
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.autosave_debounce_ms, 500);
        assert!(!config.cascade_delete_links);
    }

    #[test]
    fn non_positive_intervals_are_rejected() {
        let err = StoreConfig::from_json_str(r#"{"autosave_debounce_ms": 0}"#)
            .expect_err("zero debounce must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "autosave_debounce_ms",
                ..
            }
        ));
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = StoreConfig::from_json_str("{").expect_err("broken json must fail");
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
