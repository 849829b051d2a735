// src/error.rs

//! Unified error handling for the ingestion pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
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

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Credential invalid or expired; recoverable by re-authenticating
    #[error("Auth error: {0}")]
    Auth(String),

    /// Caller-side rate budget misconfiguration; fatal to the call
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Remote service returned a 5xx-class or transport-level failure
    #[error("Remote unavailable ({status}): {message}")]
    RemoteUnavailable { status: u16, message: String },

    /// Response body could not be decoded into the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Task status transition not allowed by the state machine
    #[error("Illegal task transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Crawling error with source-community context
    // The field is `context`, not `source`: thiserror infers a field
    // named `source` as the error's cause, which a plain String is not.
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },

    /// Cycle deadline elapsed before the operation completed
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl AppError {
    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create a rate-limit misconfiguration error.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimitExceeded(message.into())
    }

    /// Create a remote-unavailable error.
    pub fn remote(status: u16, message: impl fmt::Display) -> Self {
        Self::RemoteUnavailable {
            status,
            message: message.to_string(),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an illegal-transition error.
    pub fn illegal_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create a crawl error with source context.
    pub fn crawl(source: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: source.into(),
            message: message.to_string(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Whether the executor may retry after this error.
    ///
    /// Misconfiguration, an over-budget rate cost, and state-machine
    /// violations fail identically on every attempt; retrying them only
    /// burns the retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Config(_) | Self::RateLimitExceeded(_) | Self::IllegalTransition { .. }
        )
    }

    /// Whether the error aborts a whole crawl cycle rather than a single item.
    ///
    /// Auth and rate-budget failures poison every remaining call of the
    /// cycle; a malformed single item does not.
    pub fn is_cycle_wide(&self) -> bool {
        matches!(
            self,
            Self::Auth(_)
                | Self::RateLimitExceeded(_)
                | Self::RemoteUnavailable { .. }
                | Self::Config(_)
                | Self::Cancelled(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_error_carries_context_not_cause() {
        let err = AppError::crawl("rustlang", "cycle already in flight");
        assert_eq!(
            err.to_string(),
            "Crawl error for rustlang: cycle already in flight"
        );
        // The community name is display context, not a wrapped cause.
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_retryability_classification() {
        assert!(AppError::remote(503, "down").is_retryable());
        assert!(AppError::auth("token expired").is_retryable());
        assert!(!AppError::config("missing client_id").is_retryable());
        assert!(!AppError::rate_limit("cost over budget").is_retryable());
        assert!(!AppError::illegal_transition("Pending", "Completed").is_retryable());
    }
}
