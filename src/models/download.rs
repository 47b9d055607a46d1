use serde::{Deserialize, Serialize};

/// One issued download link. Never updated; the number of records per
/// `(owner, report_id)` is the download counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub owner: String,
    /// Order whose entitlement authorized this download.
    pub order_id: String,
    pub report_id: String,
    /// 1-based quota slot this record occupies.
    pub slot: i64,
    pub issued_at: i64,
    pub client_ip: Option<String>,
    pub client_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateDownloadRecord {
    pub owner: String,
    pub order_id: String,
    pub report_id: String,
    pub client_ip: Option<String>,
    pub client_agent: Option<String>,
}
