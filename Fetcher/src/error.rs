// src/error.rs

//! Unified error handling for the fetcher application.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for fetcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Warehouse database error
    #[cfg(feature = "warehouse")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error reported by the messaging provider
    #[error("Provider error for {channel}: {source}")]
    Provider {
        channel: String,
        #[source]
        source: ProviderError,
    },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap a provider error with the channel it occurred on.
    pub fn provider(channel: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            channel: channel.into(),
            source,
        }
    }

    /// True when the error is a permanent provider failure (bad, private or
    /// missing channel).
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                source: ProviderError::Permanent(_),
                ..
            }
        )
    }
}

/// Errors raised by a messaging provider, classified by how the caller
/// should react.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Flood-wait: the provider asks us to back off for `wait`.
    #[error("rate limited, retry after {}s", wait.as_secs())]
    RateLimited { wait: Duration },

    /// Network, timeout or protocol hiccup; worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Invalid, private or nonexistent channel; retrying will not help.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn transient(message: impl fmt::Display) -> Self {
        Self::Transient(message.to_string())
    }

    pub fn permanent(message: impl fmt::Display) -> Self {
        Self::Permanent(message.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Every transport-level reqwest failure (connect, timeout, body, decode)
        // is treated as retryable. Status codes are classified by the caller.
        Self::Transient(err.to_string())
    }
}
