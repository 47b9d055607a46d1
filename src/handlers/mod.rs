mod files;
mod payments;
mod reports;
mod webhooks;

pub use files::*;
pub use payments::*;
pub use reports::*;
pub use webhooks::*;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::middleware::account_auth;
use crate::rate_limit::{self, RateLimitLayer};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn limited(router: Router<AppState>, layer: Option<RateLimitLayer>) -> Router<AppState> {
    match layer {
        Some(layer) => router.layer(layer),
        None => router,
    }
}

/// Build the service router. `limits: None` disables per-IP limiting,
/// which needs the peer address from `into_make_service_with_connect_info`.
pub fn router(state: AppState, limits: Option<RateLimitConfig>) -> Router<AppState> {
    let auth = middleware::from_fn_with_state(state, account_auth);

    // Gateway-calling endpoints
    let strict = Router::new()
        .route("/payments/orders", post(create_order))
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/{order_id}/cancel", post(cancel_payment))
        .route_layer(auth.clone());

    let standard = Router::new()
        .route("/payments/orders/{order_id}", get(get_order))
        .route("/reports/{report_id}/download", get(download_report))
        .route_layer(auth)
        .route("/files/{*key}", get(serve_signed_file));

    let relaxed = Router::new().route("/health", get(health));

    Router::new()
        // Signature-authenticated; the gateway retries on failure
        .route("/payments/webhook", post(handle_payment_webhook))
        .merge(limited(strict, limits.map(|r| rate_limit::strict_layer(r.strict_rpm))))
        .merge(limited(standard, limits.map(|r| rate_limit::standard_layer(r.standard_rpm))))
        .merge(limited(relaxed, limits.map(|r| rate_limit::relaxed_layer(r.relaxed_rpm))))
}
