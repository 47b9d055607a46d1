use axum::{body::Bytes, extract::State, http::HeaderMap};

use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::extractors::Json;
use crate::payments::{SIGNATURE_HEADER, WebhookPayload};
use crate::reconcile::{self, WebhookAck};

/// Gateway webhook. The signature is checked against the raw body before
/// anything is parsed or looked up.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        tracing::warn!(target: "security", "Webhook rejected: {}", msg::MISSING_SIGNATURE);
        return Err(AppError::Unauthorized);
    };

    let verified = match state.webhook_verifier.verify(&body, signature) {
        Ok(verified) => verified,
        Err(e) => {
            tracing::warn!(target: "security", "Webhook rejected: malformed signature header: {}", e);
            return Err(AppError::Unauthorized);
        }
    };
    if !verified {
        tracing::warn!(target: "security", "Webhook rejected: signature verification failed");
        return Err(AppError::Unauthorized);
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Unparseable webhook payload: {}", e);
        AppError::BadRequest(format!("Invalid webhook payload: {}", e))
    })?;

    let conn = state.db.get()?;
    let ack = reconcile::apply_webhook(&conn, &payload)?;
    Ok(Json(ack))
}
