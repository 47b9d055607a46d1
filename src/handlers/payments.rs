use axum::{Extension, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::checkout;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::AccountContext;
use crate::models::{Order, OrderDetails, OrderScope};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub subject_id: String,
    pub scope: OrderScope,
}

/// Open a pending order. The amount comes from server-side pricing.
pub async fn create_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccountContext>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let conn = state.db.get()?;
    let order = checkout::open_order(
        &conn,
        &state.pricing,
        &ctx.account_id,
        &request.subject_id,
        request.scope,
    )?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Order with its full event history. Owner only.
pub async fn get_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccountContext>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderDetails>> {
    let conn = state.db.get()?;
    let details =
        queries::get_order_details(&conn, &order_id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    if details.order.owner != ctx.account_id {
        // Same answer as a missing order; ids are not confirmed to strangers.
        return Err(AppError::NotFound(msg::ORDER_NOT_FOUND.into()));
    }
    Ok(Json(details))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub order_id: String,
    pub gateway_reference: String,
    pub amount: i64,
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccountContext>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<OrderDetails>> {
    if request.order_id.trim().is_empty() {
        return Err(AppError::BadRequest("order_id is required".into()));
    }
    if request.gateway_reference.trim().is_empty() {
        return Err(AppError::BadRequest("gateway_reference is required".into()));
    }

    let details = checkout::confirm_order(
        &state,
        &ctx.account_id,
        &request.order_id,
        request.gateway_reference.trim(),
        request.amount,
    )
    .await?;
    Ok(Json(details))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
    /// Partial cancel amount; omit to cancel the whole payment.
    #[serde(default)]
    pub amount: Option<i64>,
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccountContext>,
    Path(order_id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<OrderDetails>> {
    let details = checkout::cancel_order(
        &state,
        &ctx.account_id,
        &order_id,
        &request.reason,
        request.amount,
    )
    .await?;
    Ok(Json(details))
}
