//! Error taxonomy for the transaction core.
//!
//! Three failure families with different recovery stories:
//! - [`ValidationError`]: rejected before any persistence, caller fixes input
//! - [`StorageError`]: backend write/read failed, caller retries the whole
//!   operation (the write path is not idempotent)
//! - [`DeliveryError`]: webhook transport failure, absorbed by the
//!   failure-count policy and never surfaced to the transaction path

use thiserror::Error;

/// Input rejected before any side effect.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(f64),

    #[error("markup cannot be negative")]
    NegativeMarkup,

    #[error("markup {markup:.2} exceeds 5% of transaction amount {amount:.2}")]
    MarkupExceedsCap { markup: f64, amount: f64 },

    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
}

/// Ledger or subscription backend failure. No partial state is committed for
/// the failed operation itself; already-committed prior steps are not rolled
/// back.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("write affected {0} rows, expected 1")]
    WriteRejected(usize),
}

/// Outbound webhook delivery failure. Handled internally via the
/// failure-count policy; never raised to `notify_all` callers.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("payload could not be signed or serialized: {0}")]
    Payload(String),
}

/// Unified error for service-level operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    /// Whether the caller can recover by correcting the request.
    pub fn is_validation(&self) -> bool {
        matches!(self, ServiceError::Validation(_))
    }
}
