use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// Where a disagreeing amount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountSource {
    /// The client's confirm request.
    Client,
    /// The amount the gateway reports as charged.
    Gateway,
    /// The amount echoed in a webhook.
    Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOperation {
    Confirm,
    Cancel,
}

/// What applying a webhook did to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    AlreadyApplied,
    Conflict,
}

/// One typed fact in an order's history.
///
/// The history is append-only: each transition or failed attempt adds a
/// record, nothing is ever merged into or overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEventRecord {
    Created {
        amount: i64,
        currency: String,
    },
    AmountMismatch {
        expected: i64,
        claimed: i64,
        source: AmountSource,
    },
    GatewayError {
        operation: GatewayOperation,
        code: String,
        message: String,
    },
    GatewayTimeout {
        operation: GatewayOperation,
        message: String,
    },
    Confirmed {
        gateway_reference: String,
        response: serde_json::Value,
    },
    Cancellation {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_amount: Option<i64>,
        response: serde_json::Value,
    },
    Webhook {
        event_type: String,
        gateway_reference: Option<String>,
        reported_status: Option<String>,
        outcome: WebhookOutcome,
        status: OrderStatus,
    },
}

impl OrderEventRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::AmountMismatch { .. } => "amount_mismatch",
            Self::GatewayError { .. } => "gateway_error",
            Self::GatewayTimeout { .. } => "gateway_timeout",
            Self::Confirmed { .. } => "confirmed",
            Self::Cancellation { .. } => "cancellation",
            Self::Webhook { .. } => "webhook",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderEvent {
    pub id: String,
    #[serde(skip_serializing)]
    pub order_id: String,
    #[serde(flatten)]
    pub record: OrderEventRecord,
    pub created_at: i64,
}
