//! Gateway adapter: turns order intents into gateway calls and gateway
//! answers into ledger transitions.
//!
//! Each call holds a short per-order lease while the gateway is contacted, so
//! a retried or duplicated request is answered with `AlreadyProcessed` instead
//! of reaching the gateway a second time. Whatever happens, the outcome is
//! written to the order's history before an error is returned.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::Connection;

use crate::config::Pricing;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::ledger::{self, LedgerEvent, TransitionOutcome};
use crate::models::{
    AmountSource, CreateOrder, GatewayOperation, Order, OrderDetails, OrderEventRecord,
    OrderScope, OrderStatus,
};
use crate::payments::{CancelRequest, ConfirmRequest, GatewayError};

/// Open a pending order priced from server-side configuration.
pub fn open_order(
    conn: &Connection,
    pricing: &Pricing,
    owner: &str,
    subject_id: &str,
    scope: OrderScope,
) -> Result<Order> {
    let scope = normalize_scope(scope);
    if scope.is_empty() {
        return Err(AppError::BadRequest(msg::EMPTY_SCOPE.into()));
    }
    let amount = pricing.quote(&scope);

    ledger::create(
        conn,
        &CreateOrder {
            owner: owner.to_string(),
            subject_id: subject_id.trim().to_string(),
            scope,
            amount,
            currency: pricing.currency.clone(),
        },
    )
}

/// Drop blank and duplicate evaluators; a bundle needs no explicit list.
fn normalize_scope(scope: OrderScope) -> OrderScope {
    if scope.all {
        return OrderScope::all();
    }
    let evaluators: BTreeSet<String> = scope
        .evaluators
        .into_iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    OrderScope::evaluators(evaluators)
}

fn load_owned_order(conn: &Connection, caller: &str, order_id: &str) -> Result<Order> {
    let order = queries::get_order_by_id(conn, order_id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    if order.owner != caller {
        tracing::warn!(
            target: "security",
            order_id = %order_id,
            caller = %caller,
            "Order access by non-owner rejected"
        );
        return Err(AppError::Unauthorized);
    }
    Ok(order)
}

fn lease_until(state: &AppState) -> i64 {
    Utc::now().timestamp() + state.gateway_lease.as_secs() as i64
}

fn details(conn: &Connection, order_id: &str) -> Result<OrderDetails> {
    queries::get_order_details(conn, order_id)?.or_not_found(msg::ORDER_NOT_FOUND)
}

/// Record a failed confirm and move the order to `failed` if it is still pending.
fn fail_confirm(conn: &Connection, order_id: &str, record: OrderEventRecord) -> Result<()> {
    queries::append_order_event(conn, order_id, &record)?;
    if let TransitionOutcome::Conflict(order) =
        ledger::transition(conn, order_id, &LedgerEvent::ConfirmFailed)?
    {
        tracing::warn!(
            order_id = %order_id,
            status = %order.status,
            "Confirm failure recorded but order had already left pending"
        );
    }
    Ok(())
}

fn gateway_failure_record(operation: GatewayOperation, error: &GatewayError) -> OrderEventRecord {
    match error {
        GatewayError::Rejected { code, message } => OrderEventRecord::GatewayError {
            operation,
            code: code.clone(),
            message: message.clone(),
        },
        GatewayError::Unavailable(message) => OrderEventRecord::GatewayTimeout {
            operation,
            message: message.clone(),
        },
    }
}

/// Confirm a payment the client completed with the gateway.
///
/// The amount the client sends is only ever compared against the amount
/// stored on the order; a mismatch fails the order. A definitive gateway
/// rejection fails it too, while a timeout leaves it pending so a webhook or
/// a later confirm can still settle it.
pub async fn confirm_order(
    state: &AppState,
    caller: &str,
    order_id: &str,
    gateway_reference: &str,
    claimed_amount: i64,
) -> Result<OrderDetails> {
    let order = {
        let conn = state.db.get()?;
        let order = load_owned_order(&conn, caller, order_id)?;

        if order.status != OrderStatus::Pending {
            return Err(AppError::AlreadyProcessed(msg::ORDER_ALREADY_PROCESSED.into()));
        }

        if !queries::try_acquire_order_lease(&conn, order_id, OrderStatus::Pending, lease_until(state))? {
            let current = queries::get_order_by_id(&conn, order_id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
            let reason = if current.status == OrderStatus::Pending {
                msg::CONFIRM_IN_PROGRESS
            } else {
                msg::ORDER_ALREADY_PROCESSED
            };
            return Err(AppError::AlreadyProcessed(reason.into()));
        }

        // Checked under the lease so a charge already in flight is never failed here.
        if claimed_amount != order.amount {
            tracing::warn!(
                order_id = %order_id,
                expected = order.amount,
                claimed = claimed_amount,
                "Confirm rejected: amount mismatch"
            );
            fail_confirm(
                &conn,
                order_id,
                OrderEventRecord::AmountMismatch {
                    expected: order.amount,
                    claimed: claimed_amount,
                    source: AmountSource::Client,
                },
            )?;
            return Err(AppError::AmountMismatch {
                expected: order.amount,
                claimed: claimed_amount,
            });
        }

        order
    };

    let result = state
        .gateway
        .confirm(ConfirmRequest {
            gateway_reference,
            order_id,
            amount: order.amount,
        })
        .await;

    let conn = state.db.get()?;

    let payment = match result {
        Ok(payment) => payment,
        Err(error @ GatewayError::Rejected { .. }) => {
            tracing::error!(
                order_id = %order_id,
                gateway = state.gateway.name(),
                "Gateway rejected confirm: {}",
                error
            );
            fail_confirm(
                &conn,
                order_id,
                gateway_failure_record(GatewayOperation::Confirm, &error),
            )?;
            return Err(error.into());
        }
        Err(error @ GatewayError::Unavailable(_)) => {
            tracing::error!(
                order_id = %order_id,
                gateway = state.gateway.name(),
                "Gateway unavailable during confirm, order left pending: {}",
                error
            );
            queries::append_order_event(
                &conn,
                order_id,
                &gateway_failure_record(GatewayOperation::Confirm, &error),
            )?;
            queries::release_order_lease(&conn, order_id)?;
            return Err(error.into());
        }
    };

    if payment.order_id != order.id {
        let error = GatewayError::Rejected {
            code: "order_mismatch".into(),
            message: format!("gateway confirmed order {}", payment.order_id),
        };
        tracing::error!(order_id = %order_id, "Gateway confirmed a different order: {}", error);
        fail_confirm(
            &conn,
            order_id,
            gateway_failure_record(GatewayOperation::Confirm, &error),
        )?;
        return Err(error.into());
    }

    if payment.total_amount != order.amount {
        tracing::error!(
            order_id = %order_id,
            expected = order.amount,
            charged = payment.total_amount,
            "Gateway charged a different amount than the order"
        );
        fail_confirm(
            &conn,
            order_id,
            OrderEventRecord::AmountMismatch {
                expected: order.amount,
                claimed: payment.total_amount,
                source: AmountSource::Gateway,
            },
        )?;
        return Err(AppError::AmountMismatch {
            expected: order.amount,
            claimed: payment.total_amount,
        });
    }

    queries::append_order_event(
        &conn,
        order_id,
        &OrderEventRecord::Confirmed {
            gateway_reference: payment.gateway_reference.clone(),
            response: payment.raw.clone(),
        },
    )?;

    let event = LedgerEvent::ConfirmSucceeded {
        gateway_reference: payment.gateway_reference,
    };
    match ledger::transition(&conn, order_id, &event)? {
        TransitionOutcome::Applied { .. } | TransitionOutcome::AlreadyApplied(_) => {
            details(&conn, order_id)
        }
        TransitionOutcome::Conflict(current) => {
            tracing::warn!(
                order_id = %order_id,
                status = %current.status,
                "Gateway confirmed payment but order had already moved on"
            );
            Err(AppError::AlreadyProcessed(msg::ORDER_ALREADY_PROCESSED.into()))
        }
    }
}

/// Cancel (refund) a completed order through the gateway.
///
/// A gateway failure leaves the order `completed`; it is only marked
/// refunded once the gateway has accepted the cancellation.
pub async fn cancel_order(
    state: &AppState,
    caller: &str,
    order_id: &str,
    reason: &str,
    partial_amount: Option<i64>,
) -> Result<OrderDetails> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::BadRequest("reason is required".into()));
    }

    let order = {
        let conn = state.db.get()?;
        let order = load_owned_order(&conn, caller, order_id)?;

        if let Some(amount) = partial_amount {
            if amount <= 0 || amount > order.amount {
                return Err(AppError::BadRequest(msg::INVALID_CANCEL_AMOUNT.into()));
            }
        }

        if order.status != OrderStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "{} (order is {})",
                msg::ORDER_NOT_COMPLETED,
                order.status
            )));
        }

        if !queries::try_acquire_order_lease(&conn, order_id, OrderStatus::Completed, lease_until(state))? {
            let current = queries::get_order_by_id(&conn, order_id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
            if current.status != OrderStatus::Completed {
                return Err(AppError::InvalidState(format!(
                    "{} (order is {})",
                    msg::ORDER_NOT_COMPLETED,
                    current.status
                )));
            }
            return Err(AppError::AlreadyProcessed(msg::CONFIRM_IN_PROGRESS.into()));
        }

        order
    };

    let Some(gateway_reference) = order.gateway_reference.as_deref() else {
        // Unreachable for a completed order; the schema enforces it.
        let conn = state.db.get()?;
        queries::release_order_lease(&conn, order_id)?;
        return Err(AppError::Internal(format!(
            "completed order {} has no gateway reference",
            order_id
        )));
    };

    let result = state
        .gateway
        .cancel(CancelRequest {
            gateway_reference,
            reason,
            amount: partial_amount,
        })
        .await;

    let conn = state.db.get()?;

    let payment = match result {
        Ok(payment) => payment,
        Err(error) => {
            tracing::error!(
                order_id = %order_id,
                gateway = state.gateway.name(),
                "Gateway cancel failed, order stays completed: {}",
                error
            );
            queries::append_order_event(
                &conn,
                order_id,
                &gateway_failure_record(GatewayOperation::Cancel, &error),
            )?;
            queries::release_order_lease(&conn, order_id)?;
            return Err(error.into());
        }
    };

    queries::append_order_event(
        &conn,
        order_id,
        &OrderEventRecord::Cancellation {
            reason: reason.to_string(),
            partial_amount,
            response: payment.raw,
        },
    )?;

    match ledger::transition(&conn, order_id, &LedgerEvent::CancelSucceeded)? {
        TransitionOutcome::Applied { .. } | TransitionOutcome::AlreadyApplied(_) => {
            details(&conn, order_id)
        }
        TransitionOutcome::Conflict(current) => {
            tracing::warn!(
                order_id = %order_id,
                status = %current.status,
                "Gateway cancelled payment but order had already moved on"
            );
            Err(AppError::AlreadyProcessed(msg::ORDER_ALREADY_PROCESSED.into()))
        }
    }
}
