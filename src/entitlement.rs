//! Decides whether an account has paid for a report.
//!
//! Entitlement is derived on every request from the owner's completed
//! orders; nothing is cached, so a refund takes effect on the next download.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{Order, Report};

/// Proof that an account may download a report.
#[derive(Debug, Clone)]
pub struct Entitlement {
    /// The earliest-paid matching order; stamped on the download record.
    pub order_id: String,
    /// How many completed orders cover the report (bundles and single
    /// evaluator purchases may coexist).
    pub covering_orders: usize,
}

/// Whether `order` unlocks `report`.
pub fn order_covers(order: &Order, report: &Report) -> bool {
    order.subject_id == report.subject_id && order.scope.covers(&report.evaluator)
}

/// Scan all of the owner's completed orders for the report's subject.
pub fn resolve(conn: &Connection, owner: &str, report: &Report) -> Result<Option<Entitlement>> {
    let orders = queries::list_completed_orders_for_subject(conn, owner, &report.subject_id)?;

    let covering: Vec<&Order> = orders.iter().filter(|o| order_covers(o, report)).collect();

    let Some(first) = covering.first() else {
        tracing::debug!(
            owner = %owner,
            report_id = %report.id,
            completed_orders = orders.len(),
            "No completed order covers report"
        );
        return Ok(None);
    };

    Ok(Some(Entitlement {
        order_id: first.id.clone(),
        covering_orders: covering.len(),
    }))
}
