use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::OrderEvent;

/// Lifecycle state of an order.
///
/// `pending` is the only initial state. `failed`, `refunded` and `cancelled`
/// are terminal; `completed` may only move on to `refunded` (or `failed` when
/// the gateway reports the payment failed after the fact).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::Refunded,
        OrderStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Failed | OrderStatus::Refunded | OrderStatus::Cancelled
        )
    }

    /// Every edge the ledger may take. Anything not listed here is forbidden.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Completed)
                | (OrderStatus::Pending, OrderStatus::Failed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Completed, OrderStatus::Refunded)
                | (OrderStatus::Completed, OrderStatus::Failed)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Which reports of a subject an order unlocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderScope {
    /// Bundle purchase: every evaluator's report for the subject.
    #[serde(default)]
    pub all: bool,
    /// Evaluators (e.g. "claude", "chatgpt") unlocked individually.
    #[serde(default)]
    pub evaluators: Vec<String>,
}

impl OrderScope {
    pub fn all() -> Self {
        Self {
            all: true,
            evaluators: Vec::new(),
        }
    }

    pub fn evaluators<I, S>(evaluators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            all: false,
            evaluators: evaluators.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.evaluators.iter().all(|e| e.trim().is_empty())
    }

    pub fn covers(&self, evaluator: &str) -> bool {
        self.all || self.evaluators.iter().any(|e| e == evaluator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Also sent to the gateway as the merchant order reference.
    pub id: String,
    pub owner: String,
    /// The politician whose report bundle is being bought.
    pub subject_id: String,
    pub scope: OrderScope,
    /// Computed server-side at creation; never changes.
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    /// Gateway transaction id, set once the payment is confirmed.
    pub gateway_reference: Option<String>,
    pub created_at: i64,
    pub paid_at: Option<i64>,
    pub refunded_at: Option<i64>,
    #[serde(skip_serializing)]
    pub lease_expires_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub owner: String,
    pub subject_id: String,
    pub scope: OrderScope,
    pub amount: i64,
    pub currency: String,
}

/// An order together with its append-only event history.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub metadata: Vec<OrderEvent>,
}
