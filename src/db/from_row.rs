//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// A corrupted or unknown value surfaces as a query error instead of a panic.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse a JSON text column into a typed value.
fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const ORDER_COLS: &str = "id, owner, subject_id, scope, amount, currency, status, gateway_reference, created_at, paid_at, refunded_at, lease_expires_at";

pub const ORDER_EVENT_COLS: &str = "id, order_id, payload, created_at";

pub const REPORT_COLS: &str = "id, subject_id, subject_name, evaluator, storage_key, created_at";

pub const DOWNLOAD_RECORD_COLS: &str =
    "id, owner, order_id, report_id, slot, issued_at, client_ip, client_agent";

// ============ FromRow Implementations ============

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            owner: row.get(1)?,
            subject_id: row.get(2)?,
            scope: parse_json(row, 3)?,
            amount: row.get(4)?,
            currency: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            gateway_reference: row.get(7)?,
            created_at: row.get(8)?,
            paid_at: row.get(9)?,
            refunded_at: row.get(10)?,
            lease_expires_at: row.get(11)?,
        })
    }
}

impl FromRow for OrderEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderEvent {
            id: row.get(0)?,
            order_id: row.get(1)?,
            record: parse_json(row, 2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Report {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Report {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            subject_name: row.get(2)?,
            evaluator: row.get(3)?,
            storage_key: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for DownloadRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DownloadRecord {
            id: row.get(0)?,
            owner: row.get(1)?,
            order_id: row.get(2)?,
            report_id: row.get(3)?,
            slot: row.get(4)?,
            issued_at: row.get(5)?,
            client_ip: row.get(6)?,
            client_agent: row.get(7)?,
        })
    }
}
