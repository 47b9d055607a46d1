mod http;
mod webhook;

pub use http::*;
pub use webhook::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure talking to the payment gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The gateway answered and refused the operation. Definitive.
    #[error("gateway rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// No usable answer: timeout, transport failure or gateway 5xx. The
    /// operation may or may not have happened on the gateway side.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Message safe to return to clients.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Rejected { message, .. } => message.clone(),
            GatewayError::Unavailable(_) => {
                "Payment gateway did not respond; the order is unchanged, retry later".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmRequest<'a> {
    pub gateway_reference: &'a str,
    pub order_id: &'a str,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelRequest<'a> {
    pub gateway_reference: &'a str,
    pub reason: &'a str,
    /// Partial cancel amount; `None` cancels the full payment.
    pub amount: Option<i64>,
}

/// What the gateway reports back for a confirmed or cancelled payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub gateway_reference: String,
    pub order_id: String,
    pub status: String,
    /// Amount the gateway says it charged.
    pub total_amount: i64,
    /// Full gateway response, kept verbatim in the order history.
    pub raw: serde_json::Value,
}

/// The payment service provider as seen by the order ledger.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Confirm (capture) an authorized payment for an order.
    async fn confirm(&self, request: ConfirmRequest<'_>) -> Result<GatewayPayment, GatewayError>;

    /// Cancel (refund) a confirmed payment, fully or partially.
    async fn cancel(&self, request: CancelRequest<'_>) -> Result<GatewayPayment, GatewayError>;
}
