//! Commission Engine
//! Mission: Exact fee computation for agent transactions
//! Philosophy: A commission computed here must match the ledger to the cent

use crate::models::TransactionKind;

/// Standard commission rate applied to cashouts (0.5%)
pub const CASHOUT_RATE: f64 = 0.005;

/// Standard commission rate applied to deposits (0.3%)
pub const DEPOSIT_RATE: f64 = 0.003;

/// Maximum agent markup as a fraction of the transaction amount (5%)
pub const MAX_MARKUP_RATE: f64 = 0.05;

/// Compute the standard commission for a transaction.
///
/// Pure and total: every positive amount and kind maps to a commission,
/// there is no failure path.
pub fn standard_commission(amount: f64, kind: TransactionKind) -> f64 {
    let rate = match kind {
        TransactionKind::Cashout => CASHOUT_RATE,
        TransactionKind::Deposit => DEPOSIT_RATE,
    };
    amount * rate
}

/// Whether an agent-added markup falls within the allowed cap.
///
/// The cap is inclusive: a markup of exactly 5% of the amount is valid.
/// Negative markups are rejected. Callers must refuse to persist a
/// transaction when this returns false.
pub fn markup_within_cap(markup: f64, amount: f64) -> bool {
    markup >= 0.0 && markup <= amount * MAX_MARKUP_RATE
}
