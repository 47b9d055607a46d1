use axum::{
    Extension,
    extract::State,
    http::HeaderMap,
};

use crate::db::AppState;
use crate::downloads::{self, DenialReason, DownloadDecision, SignedLink};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::AccountContext;
use crate::util::client_info;

/// Issue a signed download link for a report the caller has paid for.
pub async fn download_report(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccountContext>,
    Path(report_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SignedLink>> {
    let decision =
        downloads::request_download(&state, &ctx.account_id, &report_id, client_info(&headers))
            .await?;

    match decision {
        DownloadDecision::Granted(link) => Ok(Json(link)),
        DownloadDecision::Denied(DenialReason::NotPurchased) => Err(AppError::PaymentRequired),
        DownloadDecision::Denied(DenialReason::LimitExceeded { count, max }) => {
            Err(AppError::QuotaExceeded { count, max })
        }
    }
}
