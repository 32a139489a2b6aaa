//! Tracking configuration and validation.
//!
//! Millisecond thresholds are unsigned, so negative values are rejected while
//! parsing; `validate` covers the remaining ranges. Nothing is clamped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DomainClassifier;

/// Default idle threshold: 5 minutes.
pub const DEFAULT_IDLE_THRESHOLD_MS: u64 = 5 * 60 * 1000;

/// Default navigation gap threshold: 30 minutes.
pub const DEFAULT_SESSION_GAP_THRESHOLD_MS: u64 = 30 * 60 * 1000;

/// Default significance above which a domain change ends a session.
pub const DEFAULT_DOMAIN_CHANGE_THRESHOLD: f64 = 0.7;

/// Default significance of a change between unrelated, unclassified domains.
///
/// A tunable, not a derived value.
pub const DEFAULT_UNCLASSIFIED_SIGNIFICANCE: f64 = 0.5;

const DEFAULT_SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "reddit.com",
    "tiktok.com",
    "twitter.com",
    "youtube.com",
];

const DEFAULT_WORK_DOMAINS: &[&str] = &[
    "atlassian.net",
    "github.com",
    "gitlab.com",
    "notion.so",
    "slack.com",
    "stackoverflow.com",
];

/// Errors raised when a configuration is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid {field}: {value} (expected {expected})")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// The configuration document could not be parsed (includes negative thresholds).
    #[error("failed to parse tracking config: {0}")]
    Parse(String),
}

/// Configuration for session tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingConfig {
    /// Master switch. When false no sessions are created and activity is ignored.
    pub enable_session_tracking: bool,
    /// Inactivity (ms) before going idle; also the idle-to-timeout delay. 0 disables.
    pub idle_threshold: u64,
    /// Gap (ms) above which an inter-activity gap counts as long. 0 disables.
    pub session_gap_threshold: u64,
    /// Enables the domain-change heuristic.
    pub domain_change_session_boundary: bool,
    /// Significance a domain change must exceed to end a session.
    pub domain_change_threshold: f64,
    /// Significance assigned to changes between unrelated, unclassified domains.
    pub unclassified_domain_significance: f64,
    pub social_domains: Vec<String>,
    pub work_domains: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enable_session_tracking: true,
            idle_threshold: DEFAULT_IDLE_THRESHOLD_MS,
            session_gap_threshold: DEFAULT_SESSION_GAP_THRESHOLD_MS,
            domain_change_session_boundary: true,
            domain_change_threshold: DEFAULT_DOMAIN_CHANGE_THRESHOLD,
            unclassified_domain_significance: DEFAULT_UNCLASSIFIED_SIGNIFICANCE,
            social_domains: DEFAULT_SOCIAL_DOMAINS.iter().map(|d| d.to_string()).collect(),
            work_domains: DEFAULT_WORK_DOMAINS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl TrackingConfig {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON value (e.g. an inbound config update) and validates it.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field, returning the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_score("domainChangeThreshold", self.domain_change_threshold)?;
        check_score(
            "unclassifiedDomainSignificance",
            self.unclassified_domain_significance,
        )?;

        if let Some(entry) = self
            .social_domains
            .iter()
            .chain(self.work_domains.iter())
            .find(|d| d.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                field: "socialDomains/workDomains",
                value: format!("{entry:?}"),
                expected: "non-empty domain names",
            });
        }

        Ok(())
    }

    /// Returns true if idle detection is enabled.
    #[must_use]
    pub fn idle_detection_enabled(&self) -> bool {
        self.idle_threshold > 0
    }

    /// Returns true if the navigation-gap heuristic is enabled.
    #[must_use]
    pub fn navigation_gap_enabled(&self) -> bool {
        self.session_gap_threshold > 0
    }

    /// Builds the domain classifier from the configured lists.
    pub fn classifier(&self) -> DomainClassifier {
        DomainClassifier::new(self.social_domains.clone(), self.work_domains.clone())
    }
}

fn check_score(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            value: value.to_string(),
            expected: "a number between 0 and 1",
        })
    }
}
