//! Payment processor configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Payment processor configuration (Stripe wire format)
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Processor secret API key
    pub processor_api_key: SecretString,

    /// Webhook signing secret
    pub webhook_secret: SecretString,

    /// Base URL of the processor REST API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Maximum accepted age of a signed webhook, in seconds
    #[serde(default = "default_replay_tolerance")]
    pub replay_tolerance_secs: i64,

    /// Accepted clock skew for webhooks signed in the future, in seconds
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Reject events whose livemode flag disagrees with the API key
    #[serde(default)]
    pub require_livemode_match: bool,

    /// Attempts per gateway call before giving up on a transient error
    #[serde(default = "default_gateway_max_attempts")]
    pub gateway_max_attempts: u32,

    /// Base delay between gateway retries, in milliseconds
    #[serde(default = "default_gateway_retry_base_ms")]
    pub gateway_retry_base_ms: u64,
}

impl PaymentConfig {
    /// Check if using test mode keys
    pub fn is_test_mode(&self) -> bool {
        self.processor_api_key.expose_secret().starts_with("sk_test_")
    }

    /// Check if using live mode keys
    pub fn is_live_mode(&self) -> bool {
        self.processor_api_key.expose_secret().starts_with("sk_live_")
    }

    pub fn gateway_retry_base(&self) -> Duration {
        Duration::from_millis(self.gateway_retry_base_ms)
    }

    /// Validate payment configuration
    pub fn validate(&self, production: bool) -> Result<(), ValidationError> {
        let api_key = self.processor_api_key.expose_secret();
        let webhook_secret = self.webhook_secret.expose_secret();

        if api_key.is_empty() {
            return Err(ValidationError::MissingRequired("PROCESSOR_API_KEY"));
        }
        if webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("WEBHOOK_SECRET"));
        }
        if !api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidProcessorKey);
        }
        if !webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidWebhookSecret);
        }
        if production && !self.api_base_url.starts_with("https://") {
            return Err(ValidationError::ApiBaseUrlMustBeHttps);
        }
        if self.replay_tolerance_secs <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "replay_tolerance_secs",
            });
        }
        if self.gateway_max_attempts == 0 {
            return Err(ValidationError::MustBePositive {
                field: "gateway_max_attempts",
            });
        }
        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            processor_api_key: SecretString::new(String::new()),
            webhook_secret: SecretString::new(String::new()),
            api_base_url: default_api_base_url(),
            replay_tolerance_secs: default_replay_tolerance(),
            clock_skew_secs: default_clock_skew(),
            require_livemode_match: false,
            gateway_max_attempts: default_gateway_max_attempts(),
            gateway_retry_base_ms: default_gateway_retry_base_ms(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_replay_tolerance() -> i64 {
    300
}

fn default_clock_skew() -> i64 {
    60
}

fn default_gateway_max_attempts() -> u32 {
    3
}

fn default_gateway_retry_base_ms() -> u64 {
    250
}
