//! FieldPay Backend Library
//!
//! Core services for the field-agent transaction ledger: commission
//! computation, read-through aggregation caching, statistical anomaly
//! detection, and signed webhook delivery.
//!
//! The inbound transport layer (HTTP routing, request parsing, auth) is not
//! part of this crate; callers construct [`app::AppState`] and drive the
//! services through their typed interfaces.

pub mod anomaly;
pub mod app;
pub mod cache;
pub mod commission;
pub mod error;
pub mod ledger;
pub mod models;
pub mod transactions;
pub mod webhooks;
