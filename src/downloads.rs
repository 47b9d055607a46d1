//! Download gateway: entitlement check, quota, signed link, audit record.
//!
//! Issuing a link consumes a quota slot whether or not the client ever
//! follows it.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::db::{AppState, queries};
use crate::entitlement;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{CreateDownloadRecord, DownloadRecord};
use crate::storage::StorageError;

/// Why a download was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// No completed order covers the report.
    NotPurchased,
    /// Every quota slot has been used.
    LimitExceeded { count: i64, max: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadCounts {
    pub count: i64,
    pub remaining: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedLink {
    pub download_url: String,
    pub filename: String,
    /// Seconds until the link stops working.
    pub expires_in: u64,
    pub downloads: DownloadCounts,
    #[serde(skip_serializing)]
    pub record: DownloadRecord,
}

#[derive(Debug, Clone)]
pub enum DownloadDecision {
    Granted(SignedLink),
    Denied(DenialReason),
}

/// Who is asking, recorded on the download record.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub agent: Option<String>,
}

async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, StorageError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::Internal(format!(
            "object storage {} timed out after {:?}",
            operation, limit
        ))),
    }
}

/// Issue a signed download link for `report_id` if `owner` is entitled to it
/// and has quota left.
///
/// Entitlement is re-evaluated on every call. The quota is `policy.quota` per
/// covering completed order.
pub async fn request_download(
    state: &AppState,
    owner: &str,
    report_id: &str,
    client: ClientInfo,
) -> Result<DownloadDecision> {
    let policy = state.download;

    let (report, entitlement, max) = {
        let conn = state.db.get()?;
        let report = queries::get_report_by_id(&conn, report_id)?.or_not_found(msg::REPORT_NOT_FOUND)?;

        let Some(entitlement) = entitlement::resolve(&conn, owner, &report)? else {
            return Ok(DownloadDecision::Denied(DenialReason::NotPurchased));
        };

        let max = policy.quota * entitlement.covering_orders as i64;
        let count = queries::count_downloads(&conn, owner, report_id)?;
        if count >= max {
            tracing::info!(
                owner = %owner,
                report_id = %report_id,
                count,
                max,
                "Download denied: limit exceeded"
            );
            return Ok(DownloadDecision::Denied(DenialReason::LimitExceeded { count, max }));
        }

        (report, entitlement, max)
    };

    let exists = with_timeout(
        policy.storage_timeout,
        "existence check",
        state.storage.exists(&report.storage_key),
    )
    .await?;
    if !exists {
        tracing::warn!(
            report_id = %report_id,
            storage_key = %report.storage_key,
            "Entitled report has no file in object storage"
        );
        return Err(AppError::NotFound(msg::REPORT_FILE_MISSING.into()));
    }

    let download_url = with_timeout(
        policy.storage_timeout,
        "link signing",
        state.storage.signed_url(&report.storage_key, policy.link_ttl),
    )
    .await?;

    let conn = state.db.get()?;
    let record = queries::insert_download_record_within_quota(
        &conn,
        &CreateDownloadRecord {
            owner: owner.to_string(),
            order_id: entitlement.order_id.clone(),
            report_id: report_id.to_string(),
            client_ip: client.ip,
            client_agent: client.agent,
        },
        max,
    )?;

    let Some(record) = record else {
        let count = queries::count_downloads(&conn, owner, report_id)?;
        tracing::info!(
            owner = %owner,
            report_id = %report_id,
            count,
            max,
            "Download denied: quota taken by a concurrent request"
        );
        return Ok(DownloadDecision::Denied(DenialReason::LimitExceeded { count, max }));
    };

    let count = queries::count_downloads(&conn, owner, report_id)?;
    tracing::info!(
        owner = %owner,
        report_id = %report_id,
        order_id = %record.order_id,
        slot = record.slot,
        count,
        max,
        "Download link issued"
    );

    Ok(DownloadDecision::Granted(SignedLink {
        download_url,
        filename: report.download_filename(),
        expires_in: policy.link_ttl.as_secs(),
        downloads: DownloadCounts {
            count,
            remaining: (max - count).max(0),
            max,
        },
        record,
    }))
}
