//! Webhook rejection reasons.
//!
//! Every variant means the delivery is rejected before any ledger or
//! deduplicator access. The processor treats 4xx as final.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while authenticating or parsing a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// No signature header on the request.
    #[error("Missing signature header")]
    MissingSignature,

    /// No `v1` candidate matched the expected HMAC.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signed timestamp is older than the replay tolerance.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Signed timestamp is in the future beyond the clock skew allowance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Failed to parse the signature header or the event envelope.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Event livemode flag disagrees with the configured API key.
    #[error("Livemode mismatch: event livemode={0}")]
    LivemodeMismatch(bool),
}

impl WebhookError {
    /// Rejected deliveries are never retried by the sender.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Maps the rejection to its HTTP status.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    /// Short machine-readable reason for logs and response bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            WebhookError::MissingSignature => "missing_signature",
            WebhookError::InvalidSignature => "invalid_signature",
            WebhookError::TimestampOutOfRange => "timestamp_expired",
            WebhookError::InvalidTimestamp => "timestamp_in_future",
            WebhookError::ParseError(_) => "malformed",
            WebhookError::LivemodeMismatch(_) => "livemode_mismatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_signature_displays_correctly() {
        assert_eq!(WebhookError::InvalidSignature.to_string(), "Invalid signature");
    }

    #[test]
    fn parse_error_displays_message() {
        let err = WebhookError::ParseError("invalid JSON".to_string());
        assert_eq!(err.to_string(), "Parse error: invalid JSON");
    }

    #[test]
    fn all_rejections_are_bad_requests() {
        for err in [
            WebhookError::MissingSignature,
            WebhookError::InvalidSignature,
            WebhookError::TimestampOutOfRange,
            WebhookError::InvalidTimestamp,
            WebhookError::ParseError("x".to_string()),
            WebhookError::LivemodeMismatch(true),
        ] {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn reasons_are_stable() {
        assert_eq!(WebhookError::TimestampOutOfRange.reason(), "timestamp_expired");
        assert_eq!(WebhookError::InvalidSignature.reason(), "invalid_signature");
    }
}
