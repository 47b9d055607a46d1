use chrono::Utc;
use rusqlite::{Connection, ErrorCode, params, params_from_iter, types::Value};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    DOWNLOAD_RECORD_COLS, ORDER_COLS, ORDER_EVENT_COLS, REPORT_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Orders ============

/// Persist a new pending order and its `created` history record.
pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = gen_id();
    let now = now();
    let scope_json = serde_json::to_string(&input.scope)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO orders (id, owner, subject_id, scope, amount, currency, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
        params![
            &id,
            &input.owner,
            &input.subject_id,
            &scope_json,
            input.amount,
            &input.currency,
            now
        ],
    )?;
    append_order_event(
        &tx,
        &id,
        &OrderEventRecord::Created {
            amount: input.amount,
            currency: input.currency.clone(),
        },
    )?;
    tx.commit()?;

    Ok(Order {
        id,
        owner: input.owner.clone(),
        subject_id: input.subject_id.clone(),
        scope: input.scope.clone(),
        amount: input.amount,
        currency: input.currency.clone(),
        status: OrderStatus::Pending,
        gateway_reference: None,
        created_at: now,
        paid_at: None,
        refunded_at: None,
        lease_expires_at: None,
    })
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

/// Completed orders of an owner for one subject, oldest payment first.
pub fn list_completed_orders_for_subject(
    conn: &Connection,
    owner: &str,
    subject_id: &str,
) -> Result<Vec<Order>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM orders
             WHERE owner = ?1 AND subject_id = ?2 AND status = 'completed'
             ORDER BY paid_at ASC, created_at ASC",
            ORDER_COLS
        ),
        &[&owner, &subject_id],
    )
}

/// Column changes that ride along with a status transition.
#[derive(Debug, Default, Clone)]
pub struct TransitionChanges<'a> {
    /// Only written when present; an existing reference is never cleared.
    pub gateway_reference: Option<&'a str>,
}

/// Move an order to `target` only if its current status is one of `expected`.
///
/// This is a single conditional `UPDATE`, so of two concurrent callers only
/// one can observe `true`. Entering `completed` stamps `paid_at`, entering
/// `refunded` stamps `refunded_at`. Any gateway lease is released.
pub fn transition_order_status(
    conn: &Connection,
    id: &str,
    expected: &[OrderStatus],
    target: OrderStatus,
    changes: &TransitionChanges<'_>,
) -> Result<bool> {
    if expected.is_empty() {
        return Ok(false);
    }

    let placeholders: Vec<String> = (0..expected.len()).map(|i| format!("?{}", i + 5)).collect();
    let sql = format!(
        "UPDATE orders SET
            status = ?1,
            gateway_reference = COALESCE(?2, gateway_reference),
            paid_at = CASE WHEN ?1 = 'completed' THEN ?3 ELSE paid_at END,
            refunded_at = CASE WHEN ?1 = 'refunded' THEN ?3 ELSE refunded_at END,
            lease_expires_at = NULL
         WHERE id = ?4 AND status IN ({})",
        placeholders.join(", ")
    );

    let mut values: Vec<Value> = vec![
        Value::Text(target.as_ref().to_string()),
        changes
            .gateway_reference
            .map(|r| Value::Text(r.to_string()))
            .unwrap_or(Value::Null),
        Value::Integer(now()),
        Value::Text(id.to_string()),
    ];
    values.extend(expected.iter().map(|s| Value::Text(s.as_ref().to_string())));

    let affected = conn.execute(&sql, params_from_iter(values))?;
    Ok(affected > 0)
}

/// Claim the right to call the gateway for this order until `until`.
///
/// Succeeds only while the order is in `expected` and no unexpired lease is
/// held. Returns false when another caller holds the lease or the status moved.
pub fn try_acquire_order_lease(
    conn: &Connection,
    id: &str,
    expected: OrderStatus,
    until: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET lease_expires_at = ?1
         WHERE id = ?2 AND status = ?3 AND (lease_expires_at IS NULL OR lease_expires_at <= ?4)",
        params![until, id, expected.as_ref(), now()],
    )?;
    Ok(affected > 0)
}

pub fn release_order_lease(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE orders SET lease_expires_at = NULL WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

// ============ Order events ============

pub fn append_order_event(
    conn: &Connection,
    order_id: &str,
    record: &OrderEventRecord,
) -> Result<OrderEvent> {
    let id = gen_id();
    let created_at = now();
    let payload = serde_json::to_string(record)?;

    conn.execute(
        "INSERT INTO order_events (id, order_id, kind, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, order_id, record.kind(), &payload, created_at],
    )?;

    Ok(OrderEvent {
        id,
        order_id: order_id.to_string(),
        record: record.clone(),
        created_at,
    })
}

pub fn list_order_events(conn: &Connection, order_id: &str) -> Result<Vec<OrderEvent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_events WHERE order_id = ?1 ORDER BY created_at ASC, rowid ASC",
            ORDER_EVENT_COLS
        ),
        &[&order_id],
    )
}

pub fn get_order_details(conn: &Connection, id: &str) -> Result<Option<OrderDetails>> {
    let Some(order) = get_order_by_id(conn, id)? else {
        return Ok(None);
    };
    let metadata = list_order_events(conn, id)?;
    Ok(Some(OrderDetails { order, metadata }))
}

// ============ Reports ============

pub fn create_report(conn: &Connection, input: &CreateReport) -> Result<Report> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO reports (id, subject_id, subject_name, evaluator, storage_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.subject_id,
            &input.subject_name,
            &input.evaluator,
            &input.storage_key,
            now
        ],
    )?;

    Ok(Report {
        id,
        subject_id: input.subject_id.clone(),
        subject_name: input.subject_name.clone(),
        evaluator: input.evaluator.clone(),
        storage_key: input.storage_key.clone(),
        created_at: now,
    })
}

pub fn get_report_by_id(conn: &Connection, id: &str) -> Result<Option<Report>> {
    query_one(
        conn,
        &format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLS),
        &[&id],
    )
}

// ============ Download records ============

pub fn count_downloads(conn: &Connection, owner: &str, report_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM download_records WHERE owner = ?1 AND report_id = ?2",
        params![owner, report_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

const SLOT_CLAIM_ATTEMPTS: usize = 3;

/// Insert a download record into the slot after the highest one issued,
/// unless `max` records already exist. Records removed by retention free
/// quota without reusing their slot numbers.
///
/// Counting and inserting happen in one statement and `(owner, report_id,
/// slot)` is unique, so concurrent requests cannot exceed the quota.
/// Returns `None` when the quota is exhausted.
pub fn insert_download_record_within_quota(
    conn: &Connection,
    input: &CreateDownloadRecord,
    max: i64,
) -> Result<Option<DownloadRecord>> {
    let id = gen_id();
    let issued_at = now();

    // A concurrent writer can take the same slot first; the guard is
    // re-evaluated on retry.
    for _ in 0..SLOT_CLAIM_ATTEMPTS {
        let inserted = conn.execute(
            "INSERT INTO download_records
                (id, owner, order_id, report_id, slot, issued_at, client_ip, client_agent)
             SELECT ?1, ?2, ?3, ?4, c.top + 1, ?5, ?6, ?7
             FROM (SELECT COUNT(*) AS n, COALESCE(MAX(slot), 0) AS top
                   FROM download_records WHERE owner = ?2 AND report_id = ?4) AS c
             WHERE c.n < ?8",
            params![
                &id,
                &input.owner,
                &input.order_id,
                &input.report_id,
                issued_at,
                &input.client_ip,
                &input.client_agent,
                max
            ],
        );

        match inserted {
            Ok(0) => return Ok(None),
            Ok(_) => {
                return query_one(
                    conn,
                    &format!("SELECT {} FROM download_records WHERE id = ?1", DOWNLOAD_RECORD_COLS),
                    &[&id],
                );
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(None)
}

pub fn list_download_records(
    conn: &Connection,
    owner: &str,
    report_id: &str,
) -> Result<Vec<DownloadRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM download_records WHERE owner = ?1 AND report_id = ?2 ORDER BY slot ASC",
            DOWNLOAD_RECORD_COLS
        ),
        &[&owner, &report_id],
    )
}
