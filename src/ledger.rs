//! Order ledger: creation and the order state machine.
//!
//! Every status change in the service goes through [`transition`], which
//! applies an event as one conditional update per allowed edge. Callers that
//! race on the same order (a client confirm and a gateway webhook, or two
//! retried confirms) never both win: the loser sees the state the winner left
//! and gets [`TransitionOutcome::AlreadyApplied`] or
//! [`TransitionOutcome::Conflict`].

use rusqlite::Connection;

use crate::db::queries::{self, TransitionChanges};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{CreateOrder, Order, OrderStatus};

/// Something that happened to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// The gateway accepted our confirm call.
    ConfirmSucceeded { gateway_reference: String },
    /// Confirm was rejected (amount mismatch or definitive gateway error).
    ConfirmFailed,
    /// The gateway accepted our cancel call.
    CancelSucceeded,
    /// Webhook `PAYMENT_COMPLETED`.
    PaymentCompleted { gateway_reference: String },
    /// Webhook `PAYMENT_CANCELED`.
    PaymentCanceled,
    /// Webhook `PAYMENT_FAILED`.
    PaymentFailed,
}

impl LedgerEvent {
    /// Allowed `(from, to)` edges, tried in order.
    pub fn edges(&self) -> &'static [(OrderStatus, OrderStatus)] {
        use OrderStatus::*;
        match self {
            LedgerEvent::ConfirmSucceeded { .. } | LedgerEvent::PaymentCompleted { .. } => {
                &[(Pending, Completed)]
            }
            LedgerEvent::ConfirmFailed => &[(Pending, Failed)],
            LedgerEvent::CancelSucceeded => &[(Completed, Refunded)],
            LedgerEvent::PaymentCanceled => &[(Completed, Refunded), (Pending, Cancelled)],
            LedgerEvent::PaymentFailed => &[(Pending, Failed), (Completed, Failed)],
        }
    }

    fn gateway_reference(&self) -> Option<&str> {
        match self {
            LedgerEvent::ConfirmSucceeded { gateway_reference }
            | LedgerEvent::PaymentCompleted { gateway_reference } => Some(gateway_reference),
            _ => None,
        }
    }

    /// Whether `order` already sits where this event would have put it.
    fn already_applied(&self, order: &Order) -> bool {
        let reached = self.edges().iter().any(|(_, to)| *to == order.status);
        if !reached {
            return false;
        }
        // A completion for a different gateway transaction is not the same fact.
        match (self.gateway_reference(), order.gateway_reference.as_deref()) {
            (Some(incoming), Some(stored)) => incoming == stored,
            _ => true,
        }
    }
}

/// Result of applying a [`LedgerEvent`].
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// This call moved the order from `from` to `order.status`.
    Applied { order: Order, from: OrderStatus },
    /// The order was already in the event's target state; nothing changed.
    AlreadyApplied(Order),
    /// The order is in a state the event may not move it out of; nothing changed.
    Conflict(Order),
}

impl TransitionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            TransitionOutcome::Applied { order, .. }
            | TransitionOutcome::AlreadyApplied(order)
            | TransitionOutcome::Conflict(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            TransitionOutcome::Applied { order, .. }
            | TransitionOutcome::AlreadyApplied(order)
            | TransitionOutcome::Conflict(order) => order,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

/// Validate and persist a new pending order.
pub fn create(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    if input.owner.trim().is_empty() {
        return Err(AppError::BadRequest("owner is required".into()));
    }
    if input.subject_id.trim().is_empty() {
        return Err(AppError::BadRequest("subject_id is required".into()));
    }
    if input.scope.is_empty() {
        return Err(AppError::BadRequest(msg::EMPTY_SCOPE.into()));
    }
    if input.amount <= 0 {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }
    if input.currency.trim().is_empty() {
        return Err(AppError::BadRequest("currency is required".into()));
    }

    let order = queries::create_order(conn, input)?;
    tracing::info!(
        order_id = %order.id,
        owner = %order.owner,
        amount = order.amount,
        currency = %order.currency,
        "Order created"
    );
    Ok(order)
}

/// Apply `event` to the order, taking the first edge whose source matches.
pub fn transition(conn: &Connection, order_id: &str, event: &LedgerEvent) -> Result<TransitionOutcome> {
    let changes = TransitionChanges {
        gateway_reference: event.gateway_reference(),
    };

    for (from, to) in event.edges() {
        if queries::transition_order_status(conn, order_id, &[*from], *to, &changes)? {
            let order = queries::get_order_by_id(conn, order_id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
            tracing::info!(
                order_id = %order_id,
                from = %from,
                to = %to,
                "Order transitioned ({:?})",
                event
            );
            return Ok(TransitionOutcome::Applied { order, from: *from });
        }
    }

    let order = queries::get_order_by_id(conn, order_id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    if event.already_applied(&order) {
        tracing::debug!(
            order_id = %order_id,
            status = %order.status,
            "Order already in target state ({:?}), no-op",
            event
        );
        Ok(TransitionOutcome::AlreadyApplied(order))
    } else {
        tracing::warn!(
            order_id = %order_id,
            status = %order.status,
            "Rejected transition ({:?}) from current state",
            event
        );
        Ok(TransitionOutcome::Conflict(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_edge_is_an_allowed_status_edge() {
        let events = [
            LedgerEvent::ConfirmSucceeded {
                gateway_reference: "pk".into(),
            },
            LedgerEvent::ConfirmFailed,
            LedgerEvent::CancelSucceeded,
            LedgerEvent::PaymentCompleted {
                gateway_reference: "pk".into(),
            },
            LedgerEvent::PaymentCanceled,
            LedgerEvent::PaymentFailed,
        ];
        for event in &events {
            for (from, to) in event.edges() {
                assert!(
                    from.can_transition_to(*to),
                    "{:?} uses forbidden edge {} -> {}",
                    event,
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in OrderStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in OrderStatus::ALL {
                assert!(!from.can_transition_to(to), "{} -> {} must be forbidden", from, to);
            }
        }
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in OrderStatus::ALL {
            assert!(!from.can_transition_to(OrderStatus::Pending));
        }
    }
}
