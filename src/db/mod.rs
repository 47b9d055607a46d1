mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::jwt::SessionVerifier;
use crate::config::Pricing;
use crate::payments::{PaymentGateway, WebhookVerifier};
use crate::storage::ObjectStore;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Payment service provider client (confirm / cancel)
    pub gateway: Arc<dyn PaymentGateway>,
    /// How long a confirm/cancel may hold the per-order gateway lease
    pub gateway_lease: Duration,
    /// Verifies provider signatures on incoming webhooks
    pub webhook_verifier: WebhookVerifier,
    /// Verifies session tokens issued by the account service
    pub sessions: SessionVerifier,
    /// Blob store holding rendered reports
    pub storage: Arc<dyn ObjectStore>,
    pub pricing: Pricing,
    pub download: DownloadPolicy,
}

/// Limits applied to report downloads.
#[derive(Debug, Clone, Copy)]
pub struct DownloadPolicy {
    /// Links per purchase for one report.
    pub quota: i64,
    /// Validity window of an issued link.
    pub link_ttl: Duration,
    /// Upper bound for any single object-storage call.
    pub storage_timeout: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            quota: 10,
            link_ttl: Duration::from_secs(3600),
            storage_timeout: Duration::from_secs(10),
        }
    }
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
    });
    Pool::builder().max_size(10).build(manager)
}
