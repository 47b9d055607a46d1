//! Reportgate - paid access to evaluation reports
//!
//! Records purchases made through an external payment gateway, reconciles
//! them against the gateway's webhooks, and hands out time-boxed signed
//! download links to the accounts whose completed orders cover a report.

pub mod checkout;
pub mod config;
pub mod db;
pub mod downloads;
pub mod entitlement;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod rate_limit;
pub mod reconcile;
pub mod storage;
pub mod util;
