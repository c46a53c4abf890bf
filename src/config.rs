// ⚙️ Link Configuration - thresholds and feed filter
// Loaded once at startup and validated before any matching runs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// CONFIGURATION ERROR
// ============================================================================

/// Raised at load time for malformed rule tables or out-of-range thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub field: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        ConfigError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[config] {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// ACCEPTANCE THRESHOLDS
// ============================================================================

/// Minimum similarity scores a selected match must reach to be kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceThresholds {
    /// Round 1 keeps a match when name_score reaches this...
    pub round_one_name: f64,

    /// ...or when address_score reaches this.
    pub round_one_address: f64,

    /// Round 2 keeps a match only when name_score reaches this.
    pub round_two_name: f64,
}

impl Default for AcceptanceThresholds {
    fn default() -> Self {
        AcceptanceThresholds {
            round_one_name: 0.7,
            round_one_address: 0.7,
            round_two_name: 0.7,
        }
    }
}

impl AcceptanceThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("thresholds.round_one_name", self.round_one_name),
            ("thresholds.round_one_address", self.round_one_address),
            ("thresholds.round_two_name", self.round_two_name),
        ];

        for (field, value) in checks {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::new(
                    field,
                    format!("{} is outside [0, 1]", value),
                ));
            }
        }

        Ok(())
    }
}

// ============================================================================
// FEED FILTER
// ============================================================================

/// Which feed rows are in scope before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedFilter {
    /// Substring the STATE column must contain (e.g. "NC")
    pub state: String,

    /// Substring the activity-code column must contain ("B" = education)
    pub activity_code: String,
}

impl Default for FeedFilter {
    fn default() -> Self {
        FeedFilter {
            state: "NC".to_string(),
            activity_code: "B".to_string(),
        }
    }
}

impl FeedFilter {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state.trim().is_empty() {
            return Err(ConfigError::new("feed_filter.state", "must not be empty"));
        }
        if self.activity_code.trim().is_empty() {
            return Err(ConfigError::new(
                "feed_filter.activity_code",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// LINK CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub thresholds: AcceptanceThresholds,
    pub feed_filter: FeedFilter,
}

impl LinkConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: LinkConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_thresholds(thresholds: AcceptanceThresholds) -> Self {
        LinkConfig {
            thresholds,
            ..LinkConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.feed_filter.validate()
    }
}

// ============================================================================
// TESTS
// ============================================================================
