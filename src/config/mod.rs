//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `RENT_BILLING` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use rent_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod billing;
mod database;
mod error;
mod payment;
mod server;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::PaymentConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL connection; in-memory stores are used when absent
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Payment processor credentials and webhook verification
    pub payment: PaymentConfig,

    /// Grace window, dunning and retention policy
    #[serde(default)]
    pub billing: BillingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `RENT_BILLING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `RENT_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `RENT_BILLING__BILLING__GRACE_WINDOW_DAYS=5` -> `billing.grace_window_days = 5`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("RENT_BILLING")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.payment.validate(self.is_production())?;
        self.billing.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::env;
    use std::sync::Mutex;

    // Env vars are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn set_minimal_env() {
        env::set_var("RENT_BILLING__PAYMENT__PROCESSOR_API_KEY", "sk_test_xxx");
        env::set_var("RENT_BILLING__PAYMENT__WEBHOOK_SECRET", "whsec_xxx");
    }

    fn clear_env() {
        for key in [
            "RENT_BILLING__PAYMENT__PROCESSOR_API_KEY",
            "RENT_BILLING__PAYMENT__WEBHOOK_SECRET",
            "RENT_BILLING__SERVER__PORT",
            "RENT_BILLING__SERVER__ENVIRONMENT",
            "RENT_BILLING__DATABASE__URL",
            "RENT_BILLING__BILLING__GRACE_WINDOW_DAYS",
            "RENT_BILLING__BILLING__MAX_DUNNING_ATTEMPTS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.payment.webhook_secret.expose_secret(), "whsec_xxx");
        assert!(config.database.is_none());
    }

    #[test]
    fn test_validate_full_config() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_billing_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("RENT_BILLING__BILLING__GRACE_WINDOW_DAYS", "5");
        env::set_var("RENT_BILLING__BILLING__MAX_DUNNING_ATTEMPTS", "2");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.billing.grace_window_days, 5);
        assert_eq!(config.billing.max_dunning_attempts, 2);
        assert_eq!(config.billing.claim_timeout_secs, 300);
    }

    #[test]
    fn test_database_section_is_optional() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("RENT_BILLING__DATABASE__URL", "postgres://localhost/rent");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        let database = config.database.expect("database section");
        assert_eq!(database.url, "postgres://localhost/rent");
        assert_eq!(database.max_connections, 10);
    }

    #[test]
    fn test_is_production() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("RENT_BILLING__SERVER__ENVIRONMENT", "production");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.is_production());
    }

    #[test]
    fn test_missing_payment_section_fails() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert!(AppConfig::load().is_err());
    }
}
