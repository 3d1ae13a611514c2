//! Effect configuration.

use crate::error::{EffectError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default quiet period before a burst of outputs is forwarded.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

const DEFAULT_WORKER_NAME: &str = "cable-effect";

/// Configuration for a channel effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectConfig {
    /// Debounce window. Zero disables debouncing.
    /// Default: 200ms
    pub debounce: Duration,

    /// Name of the worker thread running the pipeline.
    pub worker_name: String,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    debounce_ms: Option<u64>,
    worker_name: Option<String>,
}

impl EffectConfig {
    /// Config with only the debounce window changed.
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            debounce,
            ..Default::default()
        }
    }

    /// Parse `{"debounce_ms": 50, "worker_name": "chat"}`. Missing fields keep defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let mut config = Self::default();

        if let Some(ms) = raw.debounce_ms {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(name) = raw.worker_name {
            if name.is_empty() {
                return Err(EffectError::Config("worker_name must not be empty".to_string()));
            }
            config.worker_name = name;
        }

        Ok(config)
    }
}
