//! Statistical anomaly detection over agent activity.
//!
//! Compares the most recent day of an agent's transaction history against the
//! mean of the preceding days and flags relative deviations beyond a
//! threshold. Produces a single flag/no-flag verdict per invocation, with a
//! reason code attached for observability.

use serde::Serialize;
use tracing::info;

use crate::models::DailyObservation;

/// Default relative-deviation cutoff
pub const DEFAULT_THRESHOLD: f64 = 2.0;

/// Minimum distinct days of history before a verdict can flag anything
pub const MIN_OBSERVATION_DAYS: usize = 2;

/// Relative-deviation test: true iff |current - avg| / avg exceeds the
/// threshold strictly.
///
/// Precondition: `historical_average > 0`. A zero average makes the ratio
/// undefined; callers treat that case as "not anomalous" (insufficient
/// history) instead of letting a NaN or infinity propagate.
pub fn is_anomalous(current: f64, historical_average: f64, threshold: f64) -> bool {
    let deviation = (current - historical_average).abs() / historical_average;
    deviation > threshold
}

/// Which metric tripped the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    TransactionCount,
    TransactionVolume,
}

/// Outcome of one detector invocation
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyVerdict {
    pub flagged: bool,
    pub reason: Option<AnomalyReason>,
    /// The day under inspection (most recent in the window), when available.
    pub observed: Option<DailyObservation>,
    /// Mean daily transaction count across the baseline days.
    pub baseline_count: f64,
    /// Mean daily total amount across the baseline days.
    pub baseline_amount: f64,
    pub threshold: f64,
}

impl AnomalyVerdict {
    fn clear(threshold: f64) -> Self {
        Self {
            flagged: false,
            reason: None,
            observed: None,
            baseline_count: 0.0,
            baseline_amount: 0.0,
            threshold,
        }
    }
}

/// Evaluate an agent's trailing window of daily observations.
///
/// `observations` must be ordered by date ascending (the ledger query
/// guarantees this). The most recent day is the observation under test; the
/// baseline is the mean count and mean total amount across the earlier days
/// only, so a spike cannot inflate its own comparison basis. Fewer than
/// [`MIN_OBSERVATION_DAYS`] distinct days, or a zero baseline for a metric,
/// yields no flag for that metric.
pub fn evaluate(observations: &[DailyObservation], threshold: f64) -> AnomalyVerdict {
    if observations.len() < MIN_OBSERVATION_DAYS {
        return AnomalyVerdict::clear(threshold);
    }

    let (baseline_days, last) = match observations.split_last() {
        Some((last, rest)) => (rest, last),
        None => return AnomalyVerdict::clear(threshold),
    };

    let n = baseline_days.len() as f64;
    let baseline_count =
        baseline_days.iter().map(|d| d.transaction_count as f64).sum::<f64>() / n;
    let baseline_amount = baseline_days.iter().map(|d| d.total_amount).sum::<f64>() / n;

    let count_flag =
        baseline_count > 0.0 && is_anomalous(last.transaction_count as f64, baseline_count, threshold);
    let amount_flag =
        baseline_amount > 0.0 && is_anomalous(last.total_amount, baseline_amount, threshold);

    let reason = if count_flag {
        Some(AnomalyReason::TransactionCount)
    } else if amount_flag {
        Some(AnomalyReason::TransactionVolume)
    } else {
        None
    };

    if let Some(reason) = reason {
        info!(
            date = %last.date,
            ?reason,
            count = last.transaction_count,
            amount = last.total_amount,
            baseline_count,
            baseline_amount,
            "🚨 Anomalous agent activity detected"
        );
    }

    AnomalyVerdict {
        flagged: reason.is_some(),
        reason,
        observed: Some(last.clone()),
        baseline_count,
        baseline_amount,
        threshold,
    }
}
