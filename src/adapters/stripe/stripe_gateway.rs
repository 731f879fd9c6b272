//! Stripe subscription gateway.
//!
//! Implements the `SubscriptionGateway` port over Stripe's form-encoded
//! REST API. Every request carries the caller's idempotency key in the
//! `Idempotency-Key` header, so a retried call replays the first response
//! instead of creating a second object.
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::from_payment_config(&app_config.payment);
//! let gateway = StripeSubscriptionGateway::new(config);
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::PaymentConfig;
use crate::domain::billing::{SubscriptionRef, AGREEMENT_METADATA_KEY};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    CancelAck, CancelMode, CreateSubscriptionRequest, CustomerProfile, GatewayError,
    GatewayErrorCode, IdempotencyKey, SubscriptionGateway,
};

use super::wire_types::{
    StripeCustomer, StripeErrorEnvelope, StripePaymentMethod, StripePrice, StripeSubscription,
};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    /// Per-request timeout.
    request_timeout: Duration,

    /// Product name shown on invoices.
    product_name: String,
}

impl StripeConfig {
    /// Create a new Stripe configuration.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            product_name: "Monthly rent".to_string(),
        }
    }

    /// Build from the application's payment configuration.
    pub fn from_payment_config(config: &PaymentConfig) -> Self {
        Self {
            api_key: config.processor_api_key.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            product_name: "Monthly rent".to_string(),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Stripe implementation of `SubscriptionGateway`.
pub struct StripeSubscriptionGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeSubscriptionGateway {
    pub fn new(config: StripeConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    /// Sends a request and decodes a 2xx body, classifying failures.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        key: &str,
        operation: &'static str,
    ) -> Result<T, GatewayError> {
        let response = request
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .header("Idempotency-Key", key)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(operation, idempotency_key = %key, error = %e, "Stripe request failed");
                GatewayError::network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let envelope = serde_json::from_str::<StripeErrorEnvelope>(&body).ok();
            let message = envelope
                .as_ref()
                .and_then(|e| e.error.message.clone())
                .unwrap_or_else(|| format!("Stripe API error ({})", status.as_u16()));

            let mut error = GatewayError::from_status(status.as_u16(), message);
            if let Some(code) = envelope.as_ref().and_then(|e| e.error.provider_code()) {
                error = error.with_provider_code(code);
            }

            tracing::warn!(
                operation,
                idempotency_key = %key,
                status = status.as_u16(),
                code = %error.code,
                retryable = error.retryable,
                "Stripe API returned an error"
            );
            return Err(error);
        }

        response.json::<T>().await.map_err(|e| {
            GatewayError::new(
                GatewayErrorCode::ProviderUnavailable,
                format!("Failed to parse Stripe response: {}", e),
            )
        })
    }

    async fn create_price(
        &self,
        request: &CreateSubscriptionRequest,
        key: &IdempotencyKey,
    ) -> Result<StripePrice, GatewayError> {
        let metadata_key = format!("metadata[{}]", AGREEMENT_METADATA_KEY);
        let params = [
            ("unit_amount", request.amount_minor.to_string()),
            ("currency", request.currency.clone()),
            ("recurring[interval]", "month".to_string()),
            ("product_data[name]", self.config.product_name.clone()),
            (metadata_key.as_str(), request.agreement_id.to_string()),
        ];
        let price_key = format!("{}:price", key);

        self.send(
            self.http_client.post(self.url("/v1/prices")).form(&params),
            &price_key,
            "create_price",
        )
        .await
    }
}

#[async_trait]
impl SubscriptionGateway for StripeSubscriptionGateway {
    async fn ensure_customer(
        &self,
        existing_customer_id: Option<&str>,
        profile: &CustomerProfile,
        key: &IdempotencyKey,
    ) -> Result<String, GatewayError> {
        if let Some(customer_id) = existing_customer_id {
            let lookup_key = format!("{}:lookup", key);
            let lookup: Result<StripeCustomer, GatewayError> = self
                .send(
                    self.http_client
                        .get(self.url(&format!("/v1/customers/{}", customer_id))),
                    &lookup_key,
                    "retrieve_customer",
                )
                .await;

            match lookup {
                Ok(customer) if !customer.deleted => return Ok(customer.id),
                Ok(_) => {
                    tracing::warn!(customer_id, "Stored Stripe customer was deleted, creating a new one");
                }
                Err(e) if e.code == GatewayErrorCode::NotFound => {
                    tracing::warn!(customer_id, "Stored Stripe customer not found, creating a new one");
                }
                Err(e) => return Err(e),
            }
        }

        let mut params = vec![("metadata[tenant_id]", profile.tenant_id.to_string())];
        if let Some(email) = &profile.email {
            params.push(("email", email.clone()));
        }
        if let Some(name) = &profile.name {
            params.push(("name", name.clone()));
        }

        let customer: StripeCustomer = self
            .send(
                self.http_client.post(self.url("/v1/customers")).form(&params),
                key.as_str(),
                "create_customer",
            )
            .await?;

        tracing::info!(
            tenant_id = %profile.tenant_id,
            customer_id = %customer.id,
            "Stripe customer created"
        );
        Ok(customer.id)
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> Result<(), GatewayError> {
        let attach_url = self.url(&format!("/v1/payment_methods/{}/attach", payment_method_id));
        let attached: StripePaymentMethod = self
            .send(
                self.http_client
                    .post(&attach_url)
                    .form(&[("customer", customer_id)]),
                key.as_str(),
                "attach_payment_method",
            )
            .await?;

        if attached.customer.as_deref() != Some(customer_id) {
            return Err(GatewayError::new(
                GatewayErrorCode::InvalidRequest,
                format!(
                    "Payment method {} is not attached to customer {}",
                    attached.id, customer_id
                ),
            ));
        }

        let default_key = format!("{}:default", key);
        let _: serde_json::Value = self
            .send(
                self.http_client
                    .post(self.url(&format!("/v1/customers/{}", customer_id)))
                    .form(&[("invoice_settings[default_payment_method]", payment_method_id)]),
                &default_key,
                "set_default_payment_method",
            )
            .await?;

        Ok(())
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
        key: &IdempotencyKey,
    ) -> Result<SubscriptionRef, GatewayError> {
        let price = self.create_price(request, key).await?;
        let metadata_key = format!("metadata[{}]", AGREEMENT_METADATA_KEY);

        let params = [
            ("customer", request.customer_id.clone()),
            ("items[0][price]", price.id),
            ("default_payment_method", request.payment_method_id.clone()),
            (metadata_key.as_str(), request.agreement_id.to_string()),
            ("billing_cycle_anchor", request.billing_anchor.as_unix_secs().to_string()),
            ("proration_behavior", "none".to_string()),
        ];

        let sub: StripeSubscription = self
            .send(
                self.http_client.post(self.url("/v1/subscriptions")).form(&params),
                key.as_str(),
                "create_subscription",
            )
            .await?;

        tracing::info!(
            agreement_id = %request.agreement_id,
            subscription_id = %sub.id,
            status = %sub.status,
            "Stripe subscription created"
        );

        Ok(SubscriptionRef {
            subscription_id: sub.id,
            customer_id: sub.customer,
            attached_at: sub
                .created
                .and_then(Timestamp::from_unix_secs)
                .unwrap_or_else(Timestamp::now),
        })
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        mode: CancelMode,
        key: &IdempotencyKey,
    ) -> Result<CancelAck, GatewayError> {
        let url = self.url(&format!("/v1/subscriptions/{}", subscription_id));

        let request = match mode {
            CancelMode::AtPeriodEnd => self
                .http_client
                .post(&url)
                .form(&[("cancel_at_period_end", "true")]),
            CancelMode::Immediately => self.http_client.delete(&url),
        };

        let sub: StripeSubscription = self
            .send(request, key.as_str(), "cancel_subscription")
            .await?;

        Ok(CancelAck {
            subscription_id: sub.id,
            status: sub.status,
            cancel_at_period_end: sub.cancel_at_period_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn config_new_sets_defaults() {
        let config = StripeConfig::new("sk_test_key");
        assert_eq!(config.api_base_url, "https://api.stripe.com");
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn config_with_base_url() {
        let config = StripeConfig::new("sk_test_key").with_base_url("http://localhost:12111");
        assert_eq!(config.api_base_url, "http://localhost:12111");
    }

    #[test]
    fn config_from_payment_config_strips_trailing_slash() {
        let payment = PaymentConfig {
            processor_api_key: SecretString::new("sk_test_abc".to_string()),
            webhook_secret: SecretString::new("whsec_abc".to_string()),
            api_base_url: "https://api.stripe.com/".to_string(),
            replay_tolerance_secs: 300,
            clock_skew_secs: 60,
            require_livemode_match: false,
            gateway_max_attempts: 3,
            gateway_retry_base_ms: 250,
        };

        let config = StripeConfig::from_payment_config(&payment);
        assert_eq!(config.api_base_url, "https://api.stripe.com");
        assert_eq!(config.api_key.expose_secret(), "sk_test_abc");
    }
}
