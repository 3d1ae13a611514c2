//! Error types for channel effects.

use thiserror::Error;

/// Main error type for channel effect operations.
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Subscribe to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("Unsubscribe from {channel} failed: {reason}")]
    Unsubscribe { channel: String, reason: String },

    #[error("Subscription rejected by server: {0}")]
    Rejected(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EffectError {
    /// Human-readable cause, as carried by the terminal error action.
    pub fn description(&self) -> String {
        self.to_string()
    }

    pub(crate) fn subscribe(channel: &str, reason: impl Into<String>) -> Self {
        EffectError::Subscribe {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsubscribe(channel: &str, reason: impl Into<String>) -> Self {
        EffectError::Unsubscribe {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EffectError {
    fn from(e: serde_json::Error) -> Self {
        EffectError::Config(e.to_string())
    }
}

/// Result type for channel effect operations.
pub type Result<T> = std::result::Result<T, EffectError>;
