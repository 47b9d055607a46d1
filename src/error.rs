use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::downloads::DownloadCounts;
use crate::payments::GatewayError;

/// Stable, client-facing error messages.
pub mod msg {
    pub const ORDER_NOT_FOUND: &str = "Order not found";
    pub const REPORT_NOT_FOUND: &str = "Report not found";
    pub const REPORT_FILE_MISSING: &str = "Report file not found";
    pub const PAYMENT_REQUIRED: &str = "Payment required";
    pub const ORDER_ALREADY_PROCESSED: &str = "Order has already been processed";
    pub const ORDER_NOT_COMPLETED: &str = "Only completed orders can be cancelled";
    pub const CONFIRM_IN_PROGRESS: &str = "A gateway call for this order is already in progress";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
    pub const MISSING_SIGNATURE: &str = "Missing webhook signature";
    pub const INVALID_LINK: &str = "Invalid or expired download link";
    pub const EMPTY_SCOPE: &str = "Scope must select at least one evaluator or set all";
    pub const INVALID_CANCEL_AMOUNT: &str =
        "Cancel amount must be positive and not exceed the order amount";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payment required")]
    PaymentRequired,

    #[error("Amount mismatch: expected {expected}, got {claimed}")]
    AmountMismatch { expected: i64, claimed: i64 },

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Download limit exceeded ({count}/{max})")]
    QuotaExceeded { count: i64, max: i64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    downloads: Option<DownloadCounts>,
}

impl AppError {
    /// Stable machine-readable code clients can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) | AppError::Json(_) => "validation_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::PaymentRequired => "payment_required",
            AppError::AmountMismatch { .. } => "amount_mismatch",
            AppError::AlreadyProcessed(_) => "already_processed",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Gateway(_) => "gateway_error",
            AppError::QuotaExceeded { .. } => "quota_exceeded",
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let mut downloads = None;
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", Some(msg.clone())),
            AppError::PaymentRequired => (StatusCode::FORBIDDEN, msg::PAYMENT_REQUIRED, None),
            AppError::AmountMismatch { .. } => (
                StatusCode::BAD_REQUEST,
                "Amount mismatch",
                Some("Amount does not match the order".to_string()),
            ),
            AppError::AlreadyProcessed(msg) => {
                (StatusCode::CONFLICT, "Already processed", Some(msg.clone()))
            }
            AppError::InvalidState(msg) => {
                (StatusCode::BAD_REQUEST, "Invalid state", Some(msg.clone()))
            }
            AppError::Gateway(e) => {
                tracing::error!("Payment gateway error: {}", e);
                (StatusCode::BAD_GATEWAY, "Payment gateway error", Some(e.public_message()))
            }
            AppError::QuotaExceeded { count, max } => {
                downloads = Some(DownloadCounts {
                    count: *count,
                    remaining: 0,
                    max: *max,
                });
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Download limit exceeded",
                    Some(format!("{} of {} downloads used", count, max)),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            code,
            details,
            downloads,
        };

        (status, Json(body)).into_response()
    }
}

/// Converts `Option<T>` lookups into `NotFound` errors.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
