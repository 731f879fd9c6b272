//! HTTP handlers for billing endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::{
    BillingError, CancelAgreementCommand, CancelAgreementHandler, CreateAgreementCommand,
    CreateAgreementHandler, GetAgreementHandler, GetAgreementQuery,
    HandleProcessorWebhookCommand, HandleProcessorWebhookHandler, ReconciliationEngine,
    RetryPolicy, WebhookDisposition,
};
use crate::domain::billing::StripeWebhookVerifier;
use crate::domain::foundation::{AgreementId, Timestamp};
use crate::ports::{EventDeduplicator, SubscriptionGateway};

use super::dto::{
    AgreementResponse, CancelAgreementRequest, CancelAgreementResponse, CreateAgreementRequest,
    ErrorResponse, HealthResponse, PaymentListResponse, PaymentResponse, WebhookResponse,
};

/// Header carrying the processor's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// This struct is cloned for each request and contains Arc-wrapped dependencies
/// for efficient sharing across handlers.
#[derive(Clone)]
pub struct BillingAppState {
    pub engine: Arc<ReconciliationEngine>,
    pub gateway: Arc<dyn SubscriptionGateway>,
    pub deduplicator: Arc<dyn EventDeduplicator>,
    pub verifier: StripeWebhookVerifier,
    pub retry: RetryPolicy,
}

impl BillingAppState {
    /// Create handlers on demand from the shared state.
    pub fn create_agreement_handler(&self) -> CreateAgreementHandler {
        CreateAgreementHandler::new(self.engine.clone(), self.gateway.clone(), self.retry)
    }

    pub fn cancel_agreement_handler(&self) -> CancelAgreementHandler {
        CancelAgreementHandler::new(self.engine.clone(), self.gateway.clone(), self.retry)
    }

    pub fn get_agreement_handler(&self) -> GetAgreementHandler {
        GetAgreementHandler::new(self.engine.ledger().clone())
    }

    pub fn webhook_handler(&self) -> HandleProcessorWebhookHandler {
        HandleProcessorWebhookHandler::new(
            self.verifier.clone(),
            self.deduplicator.clone(),
            self.engine.clone(),
            self.gateway.clone(),
            self.retry,
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /agreements/:id - Get one agreement
pub async fn get_agreement(
    State(state): State<BillingAppState>,
    Path(agreement_id): Path<AgreementId>,
) -> Result<impl IntoResponse, BillingApiError> {
    let agreement = state
        .get_agreement_handler()
        .handle(GetAgreementQuery { agreement_id })
        .await?;

    Ok(Json(AgreementResponse::from(agreement)))
}

/// GET /agreements/:id/payments - Payment history
pub async fn list_payments(
    State(state): State<BillingAppState>,
    Path(agreement_id): Path<AgreementId>,
) -> Result<impl IntoResponse, BillingApiError> {
    let payments = state
        .get_agreement_handler()
        .payments(GetAgreementQuery { agreement_id })
        .await?;

    Ok(Json(PaymentListResponse {
        agreement_id,
        payments: payments.into_iter().map(PaymentResponse::from).collect(),
    }))
}

/// GET /health - Liveness check
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /agreements - Create an agreement and its subscription
pub async fn create_agreement(
    State(state): State<BillingAppState>,
    Json(request): Json<CreateAgreementRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let cmd = CreateAgreementCommand {
        tenant_id: request.tenant_id,
        property_id: request.property_id,
        customer_id: request.customer_id,
        tenant_email: request.tenant_email,
        tenant_name: request.tenant_name,
        payment_method_id: request.payment_method_id,
        monthly_amount_minor: request.monthly_amount_minor,
        currency: request.currency,
        billing_anchor_day: request.billing_anchor_day,
    };

    let result = state
        .create_agreement_handler()
        .handle(cmd, Timestamp::now())
        .await?;

    Ok((StatusCode::CREATED, Json(AgreementResponse::from(result.agreement))))
}

/// POST /agreements/:id/cancel - Cancel now or at period end
pub async fn cancel_agreement(
    State(state): State<BillingAppState>,
    Path(agreement_id): Path<AgreementId>,
    request: Option<Json<CancelAgreementRequest>>,
) -> Result<impl IntoResponse, BillingApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let cmd = CancelAgreementCommand {
        agreement_id,
        at_period_end: request.at_period_end,
    };

    let result = state
        .cancel_agreement_handler()
        .handle(cmd, Timestamp::now())
        .await?;

    let cancel_at_period_end = result
        .remote
        .as_ref()
        .map_or(false, |ack| ack.cancel_at_period_end);
    Ok(Json(CancelAgreementResponse {
        agreement: AgreementResponse::from(result.agreement),
        remote_status: result.remote.map(|ack| ack.status),
        cancel_at_period_end,
    }))
}

/// POST /webhooks/processor - Handle processor webhook events
///
/// The body is taken as raw bytes; the signature covers them exactly.
pub async fn handle_processor_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, BillingApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let cmd = HandleProcessorWebhookCommand {
        payload: body.to_vec(),
        signature,
    };

    let disposition = state.webhook_handler().handle(cmd, Timestamp::now()).await?;

    let status = match disposition {
        WebhookDisposition::InFlight { .. } => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(WebhookResponse::from(&disposition))).into_response())
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct BillingApiError(BillingError);

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl BillingApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BillingError::Verification(e) => e.status_code(),
            BillingError::Validation(_) => StatusCode::BAD_REQUEST,
            BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            BillingError::InvalidTransition(_) => StatusCode::CONFLICT,
            BillingError::Gateway(_) => StatusCode::BAD_GATEWAY,
            BillingError::TransientGateway(_) | BillingError::NotReady(..) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BillingError::LedgerConflict { .. } | BillingError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        }

        let error_code = match &self.0 {
            BillingError::Verification(e) => e.reason().to_ascii_uppercase(),
            BillingError::Gateway(e) | BillingError::TransientGateway(e) => e.code.to_string(),
            other => other.code().to_string(),
        };

        // Storage details stay in the logs
        let message = match &self.0 {
            BillingError::Storage(_) => "internal storage error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse::new(error_code, message).retryable(self.0.is_retryable());
        (status, Json(body)).into_response()
    }
}
