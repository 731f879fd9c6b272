//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("Invalid processor API key format")]
    InvalidProcessorKey,

    #[error("Invalid webhook signing secret format")]
    InvalidWebhookSecret,

    #[error("Processor API base URL must use HTTPS in production")]
    ApiBaseUrlMustBeHttps,

    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("dunning backoff cap must not be below the backoff base")]
    BackoffCapBelowBase,
}
