use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider signature: `t=<unix>,v1=<hex hmac>`.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Verifies provider-issued webhook signatures.
///
/// The signature is HMAC-SHA256 over `"{timestamp}.{raw body}"` with the
/// shared webhook secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Allowed clock skew for timestamps from the future (in seconds).
    const FUTURE_SKEW_SECS: i64 = 60;

    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Build the header value the provider would send for `payload`.
    pub fn signature_header(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let timestamp = timestamp.to_string();
        let signature = hex::encode(self.mac(&timestamp, payload)?.finalize().into_bytes());
        Ok(format!("t={},v1={}", timestamp, signature))
    }

    /// Returns `Ok(false)` for a wrong, stale or future-dated signature and
    /// `Err(BadRequest)` for a header that cannot be parsed at all.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<bool> {
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;
        if age > Self::TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                target: "security",
                "Webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }
        if age < -Self::FUTURE_SKEW_SECS {
            tracing::warn!(
                target: "security",
                "Webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        let Ok(provided) = hex::decode(sig_v1) else {
            return Ok(false);
        };

        // Length is not secret (always 32 bytes for SHA-256)
        let expected = self.mac(timestamp_str, payload)?.finalize().into_bytes();
        if expected.len() != provided.len() {
            return Ok(false);
        }

        Ok(expected.as_slice().ct_eq(&provided).into())
    }
}

/// The three gateway events this service consumes. Anything else fails to
/// deserialize instead of being acknowledged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventType {
    PaymentCompleted,
    PaymentCanceled,
    PaymentFailed,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::PaymentCompleted => "PAYMENT_COMPLETED",
            WebhookEventType::PaymentCanceled => "PAYMENT_CANCELED",
            WebhookEventType::PaymentFailed => "PAYMENT_FAILED",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub order_id: String,
    #[serde(default)]
    pub gateway_reference: Option<String>,
    /// Gateway-side status string, recorded as reported.
    #[serde(default)]
    pub status: Option<String>,
    /// Charged amount, when the gateway includes it.
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event_type: WebhookEventType,
    pub data: WebhookData,
}
