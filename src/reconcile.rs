//! Applies verified gateway webhooks to the order ledger.
//!
//! The gateway may deliver an event more than once and in any order relative
//! to the client's own confirm call. Each event maps to a fixed target state,
//! so redelivery is answered with `already_applied` and an event that arrives
//! after the order moved elsewhere is answered with `conflict`. Either way the
//! delivery is acknowledged and recorded in the order history.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::ledger::{self, LedgerEvent, TransitionOutcome};
use crate::models::{AmountSource, OrderEventRecord, OrderStatus, WebhookOutcome};
use crate::payments::{WebhookEventType, WebhookPayload};

/// Acknowledgement returned to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub order_id: String,
    pub outcome: WebhookOutcome,
    pub status: OrderStatus,
}

fn ledger_event(payload: &WebhookPayload) -> Result<LedgerEvent> {
    Ok(match payload.event_type {
        WebhookEventType::PaymentCompleted => {
            let gateway_reference = payload
                .data
                .gateway_reference
                .clone()
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| {
                    AppError::BadRequest(
                        "gateway_reference is required for PAYMENT_COMPLETED".into(),
                    )
                })?;
            LedgerEvent::PaymentCompleted { gateway_reference }
        }
        WebhookEventType::PaymentCanceled => LedgerEvent::PaymentCanceled,
        WebhookEventType::PaymentFailed => LedgerEvent::PaymentFailed,
    })
}

fn outcome_of(transition: &TransitionOutcome) -> WebhookOutcome {
    match transition {
        TransitionOutcome::Applied { .. } => WebhookOutcome::Applied,
        TransitionOutcome::AlreadyApplied(_) => WebhookOutcome::AlreadyApplied,
        TransitionOutcome::Conflict(_) => WebhookOutcome::Conflict,
    }
}

/// Apply one signature-verified webhook.
///
/// Unknown orders are a `NotFound` error. A `PAYMENT_COMPLETED` that reports
/// a charged amount different from the order amount fails a pending order
/// instead of completing it.
pub fn apply_webhook(conn: &Connection, payload: &WebhookPayload) -> Result<WebhookAck> {
    let data = &payload.data;
    let event = ledger_event(payload)?;
    let order = queries::get_order_by_id(conn, &data.order_id)?.or_not_found(msg::ORDER_NOT_FOUND)?;

    let tampered_amount = match (payload.event_type, data.amount) {
        (WebhookEventType::PaymentCompleted, Some(amount)) if amount != order.amount => Some(amount),
        _ => None,
    };

    let transition = match tampered_amount {
        Some(reported) if order.status == OrderStatus::Pending => {
            tracing::warn!(
                order_id = %order.id,
                expected = order.amount,
                reported,
                "Webhook reported a different amount, failing order"
            );
            queries::append_order_event(
                conn,
                &order.id,
                &OrderEventRecord::AmountMismatch {
                    expected: order.amount,
                    claimed: reported,
                    source: AmountSource::Webhook,
                },
            )?;
            ledger::transition(conn, &order.id, &LedgerEvent::ConfirmFailed)?
        }
        _ => ledger::transition(conn, &order.id, &event)?,
    };

    let outcome = outcome_of(&transition);
    let current = transition.into_order();

    queries::append_order_event(
        conn,
        &current.id,
        &OrderEventRecord::Webhook {
            event_type: payload.event_type.as_str().to_string(),
            gateway_reference: data.gateway_reference.clone(),
            reported_status: data.status.clone(),
            outcome,
            status: current.status,
        },
    )?;

    match outcome {
        WebhookOutcome::Applied => tracing::info!(
            order_id = %current.id,
            event_type = payload.event_type.as_str(),
            status = %current.status,
            "Webhook applied"
        ),
        WebhookOutcome::AlreadyApplied => tracing::debug!(
            order_id = %current.id,
            event_type = payload.event_type.as_str(),
            "Webhook redelivery, order unchanged"
        ),
        WebhookOutcome::Conflict => tracing::warn!(
            order_id = %current.id,
            event_type = payload.event_type.as_str(),
            status = %current.status,
            "Webhook conflicts with current order state, acknowledged without change"
        ),
    }

    Ok(WebhookAck {
        order_id: current.id,
        outcome,
        status: current.status,
    })
}
