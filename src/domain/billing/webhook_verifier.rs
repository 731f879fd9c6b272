//! Processor webhook signature verification.
//!
//! Implements verification of Stripe-format webhook signatures using
//! HMAC-SHA256 over `"{t}.{raw payload}"`, with timestamp validation to
//! prevent replay. Verification is pure: the caller passes the clock.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::Timestamp;

use super::billing_event::ProcessorEvent;
use super::webhook_errors::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window for signed deliveries (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Default allowance for signatures stamped in the future (1 minute).
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed components from the Stripe-Signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp when the signature was generated.
    pub timestamp: i64,
    /// Every `v1` candidate; more than one is sent during secret rotation.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses a Stripe-Signature header string.
    ///
    /// Format: `t=<timestamp>,v1=<signature>[,v1=<signature>][,v0=<legacy>]`
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::ParseError` if the header format is invalid.
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| WebhookError::ParseError("invalid header format".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        WebhookError::ParseError("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    // A malformed candidate can never match; skip it
                    if let Ok(signature) = hex::decode(value) {
                        v1_signatures.push(signature);
                    }
                }
                // v0 and unknown schemes are not trusted
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| WebhookError::ParseError("missing timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::ParseError("missing v1 signature".to_string()));
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Result of checking one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid(WebhookError),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }

    pub fn into_result(self) -> Result<(), WebhookError> {
        match self {
            Verification::Valid => Ok(()),
            Verification::Invalid(err) => Err(err),
        }
    }
}

/// Checks a delivery against the signing secret.
///
/// Rejects timestamps older than `tolerance_secs` or more than
/// `clock_skew_secs` ahead of `now`.
pub fn verify(
    payload: &[u8],
    signature_header: &str,
    signing_secret: &str,
    tolerance_secs: i64,
    clock_skew_secs: i64,
    now: Timestamp,
) -> Verification {
    let header = match SignatureHeader::parse(signature_header) {
        Ok(header) => header,
        Err(err) => return Verification::Invalid(err),
    };

    let Some(age) = now.as_unix_secs().checked_sub(header.timestamp) else {
        return Verification::Invalid(WebhookError::TimestampOutOfRange);
    };
    if age > tolerance_secs {
        return Verification::Invalid(WebhookError::TimestampOutOfRange);
    }
    if age < -clock_skew_secs {
        return Verification::Invalid(WebhookError::InvalidTimestamp);
    }

    let expected = compute_signature(signing_secret, header.timestamp, payload);
    let matched = header
        .v1_signatures
        .iter()
        .fold(false, |found, candidate| found | constant_time_compare(&expected, candidate));

    if matched {
        Verification::Valid
    } else {
        Verification::Invalid(WebhookError::InvalidSignature)
    }
}

/// Verifier bound to one signing secret and replay policy.
#[derive(Clone)]
pub struct StripeWebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
    clock_skew_secs: i64,
    /// Expected livemode flag, when enforced.
    livemode: Option<bool>,
}

impl StripeWebhookVerifier {
    /// Creates a verifier with the default replay window.
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            livemode: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64, clock_skew_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self.clock_skew_secs = clock_skew_secs;
        self
    }

    /// Rejects events whose livemode flag differs from `livemode`.
    pub fn require_livemode(mut self, livemode: bool) -> Self {
        self.livemode = Some(livemode);
        self
    }

    /// Verifies the signature and parses the event envelope.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` - no candidate matched
    /// - `TimestampOutOfRange` - older than the replay window
    /// - `InvalidTimestamp` - too far in the future
    /// - `ParseError` - bad header or unparseable envelope
    /// - `LivemodeMismatch` - event from the wrong processor mode
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: Timestamp,
    ) -> Result<ProcessorEvent, WebhookError> {
        verify(
            payload,
            signature_header,
            self.secret.expose_secret(),
            self.tolerance_secs,
            self.clock_skew_secs,
            now,
        )
        .into_result()?;

        let event = ProcessorEvent::parse(payload)
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        if let Some(expected) = self.livemode {
            if event.livemode != expected {
                return Err(WebhookError::LivemodeMismatch(event.livemode));
            }
        }

        Ok(event)
    }
}

/// Computes the HMAC-SHA256 signature for the given timestamp and payload.
fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Hex signature for a payload, as the processor would send it.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    hex::encode(compute_signature(secret, timestamp, payload))
}

/// Performs constant-time comparison of two byte slices.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
