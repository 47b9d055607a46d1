//! Test utilities and fixtures for Reportgate integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::{Value, json};
use tempfile::TempDir;

// Re-export the main library crate
pub use reportgate::checkout;
pub use reportgate::config::Pricing;
pub use reportgate::db::{AppState, DbPool, DownloadPolicy, create_pool, init_db, queries};
pub use reportgate::downloads::{self, ClientInfo, DenialReason, DownloadDecision};
pub use reportgate::error::AppError;
pub use reportgate::handlers;
pub use reportgate::jwt::SessionVerifier;
pub use reportgate::ledger::{self, LedgerEvent, TransitionOutcome};
pub use reportgate::models::*;
pub use reportgate::payments::{
    CancelRequest, ConfirmRequest, GatewayError, GatewayPayment, PaymentGateway,
    SIGNATURE_HEADER, WebhookVerifier,
};
pub use reportgate::reconcile;
pub use reportgate::storage::{ObjectStore, StorageError};

pub const SESSION_SECRET: &[u8] = b"test-session-secret-0123456789abcdef";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const OWNER: &str = "acct-owner";
pub const OTHER_ACCOUNT: &str = "acct-other";
pub const SUBJECT: &str = "subject-1";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

// ============ Payment gateway double ============

/// Gateway double. Calls are counted; scripted results are consumed first,
/// after which every call succeeds and echoes the request.
#[derive(Default)]
pub struct MockGateway {
    confirm_script: Mutex<VecDeque<Result<GatewayPayment, GatewayError>>>,
    cancel_script: Mutex<VecDeque<Result<GatewayPayment, GatewayError>>>,
    confirm_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockGateway {
    pub fn push_confirm(&self, result: Result<GatewayPayment, GatewayError>) {
        self.confirm_script.lock().unwrap().push_back(result);
    }

    pub fn push_cancel(&self, result: Result<GatewayPayment, GatewayError>) {
        self.cancel_script.lock().unwrap().push_back(result);
    }

    /// Make every call take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

pub fn gateway_payment(gateway_reference: &str, order_id: &str, status: &str, amount: i64) -> GatewayPayment {
    let raw = json!({
        "paymentKey": gateway_reference,
        "orderId": order_id,
        "status": status,
        "totalAmount": amount,
    });
    GatewayPayment {
        gateway_reference: gateway_reference.to_string(),
        order_id: order_id.to_string(),
        status: status.to_string(),
        total_amount: amount,
        raw,
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn confirm(&self, request: ConfirmRequest<'_>) -> Result<GatewayPayment, GatewayError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        let scripted = self.confirm_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(gateway_payment(
                request.gateway_reference,
                request.order_id,
                "DONE",
                request.amount,
            ))
        })
    }

    async fn cancel(&self, request: CancelRequest<'_>) -> Result<GatewayPayment, GatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        let scripted = self.cancel_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(gateway_payment(
                request.gateway_reference,
                "",
                "CANCELED",
                request.amount.unwrap_or_default(),
            ))
        })
    }
}

// ============ Object store double ============

#[derive(Default)]
pub struct MemoryObjectStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn put(&self, key: &str, data: &[u8]) {
        self.blobs.lock().unwrap().insert(key.to_string(), data.to_vec());
    }

    pub fn remove(&self, key: &str) {
        self.blobs.lock().unwrap().remove(key);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.lock().unwrap().contains_key(key))
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        Ok(format!(
            "https://storage.test/{}?expires={}&signature=test",
            key,
            now() + expires_in.as_secs() as i64
        ))
    }
}

// ============ App state ============

pub struct TestContext {
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    pub storage: Arc<MemoryObjectStore>,
    _db_dir: Option<TempDir>,
}

fn build_state(pool: DbPool, gateway: Arc<MockGateway>, storage: Arc<MemoryObjectStore>) -> AppState {
    AppState {
        db: pool,
        gateway,
        gateway_lease: Duration::from_secs(30),
        webhook_verifier: WebhookVerifier::new(WEBHOOK_SECRET),
        sessions: SessionVerifier::new(SESSION_SECRET),
        storage,
        pricing: Pricing::default(),
        download: DownloadPolicy::default(),
    }
}

impl TestContext {
    /// State over a single in-memory connection. Code under test must never
    /// hold two pool connections at once.
    pub fn new() -> Self {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            init_db(&conn).unwrap();
        }
        let gateway = Arc::new(MockGateway::default());
        let storage = Arc::new(MemoryObjectStore::default());
        Self {
            state: build_state(pool, gateway.clone(), storage.clone()),
            gateway,
            storage,
            _db_dir: None,
        }
    }

    /// State over a temporary WAL database file with a multi-connection pool,
    /// for tests that race concurrent requests.
    pub fn file_backed() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reportgate.db");
        let pool = create_pool(&path.display().to_string()).unwrap();
        {
            let conn = pool.get().unwrap();
            init_db(&conn).unwrap();
        }
        let gateway = Arc::new(MockGateway::default());
        let storage = Arc::new(MemoryObjectStore::default());
        Self {
            state: build_state(pool, gateway.clone(), storage.clone()),
            gateway,
            storage,
            _db_dir: Some(dir),
        }
    }

    /// Router without rate limiting.
    pub fn app(&self) -> Router {
        handlers::router(self.state.clone(), None).with_state(self.state.clone())
    }

    pub fn token(&self, account_id: &str) -> String {
        self.state.sessions.issue(account_id, 3600).unwrap()
    }

    pub fn order(&self, order_id: &str) -> Order {
        let conn = self.state.db.get().unwrap();
        queries::get_order_by_id(&conn, order_id).unwrap().unwrap()
    }

    pub fn events(&self, order_id: &str) -> Vec<OrderEventRecord> {
        let conn = self.state.db.get().unwrap();
        queries::list_order_events(&conn, order_id)
            .unwrap()
            .into_iter()
            .map(|e| e.record)
            .collect()
    }

    pub fn pending_order(&self, owner: &str, scope: OrderScope) -> Order {
        let conn = self.state.db.get().unwrap();
        create_pending_order(&conn, owner, SUBJECT, scope)
    }

    pub fn completed_order(&self, owner: &str, scope: OrderScope) -> Order {
        let conn = self.state.db.get().unwrap();
        create_completed_order(&conn, owner, SUBJECT, scope)
    }

    /// A report whose file is present in the object store.
    pub fn report(&self, evaluator: &str) -> Report {
        let conn = self.state.db.get().unwrap();
        let report = create_test_report(&conn, SUBJECT, evaluator);
        self.storage.put(&report.storage_key, b"%PDF-1.4 test");
        report
    }

    pub fn signed_webhook(&self, body: &Value) -> (String, String) {
        let payload = serde_json::to_string(body).unwrap();
        let header = self
            .state
            .webhook_verifier
            .signature_header(payload.as_bytes(), now())
            .unwrap();
        (payload, header)
    }
}

// ============ Fixtures ============

pub fn create_pending_order(conn: &Connection, owner: &str, subject_id: &str, scope: OrderScope) -> Order {
    checkout::open_order(conn, &Pricing::default(), owner, subject_id, scope)
        .expect("Failed to create test order")
}

/// A pending order settled by a `PAYMENT_COMPLETED` webhook.
pub fn create_completed_order(conn: &Connection, owner: &str, subject_id: &str, scope: OrderScope) -> Order {
    let order = create_pending_order(conn, owner, subject_id, scope);
    let outcome = ledger::transition(
        conn,
        &order.id,
        &LedgerEvent::PaymentCompleted {
            gateway_reference: format!("pk_{}", order.id),
        },
    )
    .expect("Failed to complete test order");
    assert!(outcome.is_applied());
    outcome.into_order()
}

pub fn create_test_report(conn: &Connection, subject_id: &str, evaluator: &str) -> Report {
    queries::create_report(
        conn,
        &CreateReport {
            subject_id: subject_id.to_string(),
            subject_name: "Jane Doe".to_string(),
            evaluator: evaluator.to_string(),
            storage_key: format!("reports/{}/{}.pdf", subject_id, evaluator),
        },
    )
    .expect("Failed to create test report")
}

pub fn webhook_body(event_type: &str, order_id: &str, gateway_reference: Option<&str>) -> Value {
    json!({
        "event_type": event_type,
        "data": {
            "order_id": order_id,
            "gateway_reference": gateway_reference,
            "status": "DONE",
        }
    })
}

// ============ HTTP helpers ============

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(serde_json::to_vec(body).unwrap())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
