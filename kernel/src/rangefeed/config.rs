// Scan Configuration
//
// Describes one catch-up scan in a form that can be loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::mvcc::{Span, Timestamp, KEY_MAX};

use super::{CatchUpOptions, IntentPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed scan config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Catch-up scan configuration loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub span: SpanConfig,

    /// Exclusive lower bound.
    #[serde(default)]
    pub start_timestamp: Timestamp,

    /// Inclusive upper bound.
    #[serde(default)]
    pub end_timestamp: Option<Timestamp>,

    #[serde(default)]
    pub with_diff: bool,

    #[serde(default)]
    pub intents: IntentPolicy,
}

/// Span bounds as UTF-8 strings. A missing end covers the rest of the
/// keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanConfig {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
}

impl ScanConfig {
    /// Default built-in config (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            span: SpanConfig::default(),
            start_timestamp: Timestamp::ZERO,
            end_timestamp: None,
            with_diff: false,
            intents: IntentPolicy::default(),
        }
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn span(&self) -> Span {
        let end = match &self.span.end {
            Some(end) => end.as_bytes().to_vec(),
            None => KEY_MAX.to_vec(),
        };
        Span::new(self.span.start.as_bytes(), end)
    }

    pub fn options(&self) -> CatchUpOptions {
        CatchUpOptions {
            end_timestamp: self.end_timestamp,
            intents: self.intents,
        }
    }
}
