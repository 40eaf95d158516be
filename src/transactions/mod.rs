//! Transaction Service
//!
//! Primary write transaction boundary: validates and persists agent
//! transactions, computes commissions, invalidates the aggregation cache for
//! the affected scopes, and hands delivery/anomaly work to the background
//! dispatcher. Reads go through the cache and fall back to direct ledger
//! aggregation on a miss.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::anomaly::{self, AnomalyVerdict};
use crate::cache::{AggregateValue, AggregationCache, AggregationKey};
use crate::commission;
use crate::error::{ServiceError, ValidationError};
use crate::ledger::LedgerStore;
use crate::models::{
    AgentPerformance, RegionPerformance, Transaction, TransactionKind, TransactionStatus,
};
use crate::webhooks::dispatcher::DispatchJob;

/// Trailing window, in days, the anomaly scan looks at
pub const ANOMALY_WINDOW_DAYS: i64 = 7;

/// A validated-but-unpersisted transaction request. The authenticated
/// agent id is threaded separately so it can never come from ambient state.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub amount: f64,
    pub kind: TransactionKind,
    pub agent_markup: f64,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
}

pub struct TransactionService {
    store: Arc<LedgerStore>,
    cache: Arc<AggregationCache>,
    jobs: mpsc::Sender<DispatchJob>,
    anomaly_threshold: f64,
}

impl TransactionService {
    pub fn new(
        store: Arc<LedgerStore>,
        cache: Arc<AggregationCache>,
        jobs: mpsc::Sender<DispatchJob>,
        anomaly_threshold: f64,
    ) -> Self {
        Self {
            store,
            cache,
            jobs,
            anomaly_threshold,
        }
    }

    /// Record a transaction for the authenticated agent.
    ///
    /// Validation failures reject before any side effect. A storage failure
    /// performs no cache invalidation; the caller retries the whole
    /// operation (retries can create duplicate rows; there is no
    /// idempotency token). Persistence and invalidation are not atomic
    /// across a crash; cache entries are advisory and self-heal via TTL.
    pub async fn record_transaction(
        &self,
        agent_id: &str,
        request: NewTransaction,
    ) -> Result<Transaction, ServiceError> {
        if request.amount <= 0.0 {
            return Err(ValidationError::NonPositiveAmount(request.amount).into());
        }
        if request.agent_markup < 0.0 {
            return Err(ValidationError::NegativeMarkup.into());
        }
        if !commission::markup_within_cap(request.agent_markup, request.amount) {
            return Err(ValidationError::MarkupExceedsCap {
                markup: request.agent_markup,
                amount: request.amount,
            }
            .into());
        }

        let transaction = Transaction {
            transaction_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            amount: request.amount,
            transaction_type: request.kind,
            status: TransactionStatus::Success,
            standard_commission: commission::standard_commission(request.amount, request.kind),
            agent_markup: request.agent_markup,
            customer_phone: request.customer_phone,
            notes: request.notes,
            created_at: Utc::now(),
        };

        self.store.insert_transaction(&transaction).await?;

        self.cache.invalidate_scope(agent_id);
        match self.store.agent_region(agent_id) {
            Ok(Some(region_id)) => {
                self.cache.invalidate_scope(&region_id);
            }
            Ok(None) => {}
            Err(e) => {
                // The write is durable; a failed region lookup degrades to
                // agent-scope invalidation and the region entry expires via TTL.
                warn!(agent_id, error = %e, "region lookup failed after write");
            }
        }

        if let Err(e) = self.jobs.try_send(DispatchJob {
            transaction: transaction.clone(),
        }) {
            warn!(agent_id, error = %e, "dispatch queue unavailable, dropping job");
        }

        debug!(
            agent_id,
            transaction_id = %transaction.transaction_id,
            amount = transaction.amount,
            commission = transaction.standard_commission,
            "transaction recorded"
        );

        Ok(transaction)
    }

    /// Agent performance statistics, read through the cache.
    pub async fn agent_performance(
        &self,
        agent_id: &str,
    ) -> Result<AgentPerformance, ServiceError> {
        let key = AggregationKey::agent_performance(agent_id);
        if let Some(AggregateValue::AgentPerformance(perf)) = self.cache.get(&key) {
            return Ok(perf);
        }

        let perf = self.store.agent_performance(agent_id)?;
        self.cache
            .put_default(key, AggregateValue::AgentPerformance(perf.clone()));
        Ok(perf)
    }

    /// Region performance statistics, read through the cache.
    pub async fn region_performance(
        &self,
        region_id: &str,
    ) -> Result<RegionPerformance, ServiceError> {
        let key = AggregationKey::region_performance(region_id);
        if let Some(AggregateValue::RegionPerformance(perf)) = self.cache.get(&key) {
            return Ok(perf);
        }

        let perf = self.store.region_performance(region_id)?;
        self.cache
            .put_default(key, AggregateValue::RegionPerformance(perf.clone()));
        Ok(perf)
    }

    /// Windowed transaction listing for an agent, newest first, read through
    /// the cache under an exact window key.
    pub async fn agent_transactions(
        &self,
        agent_id: &str,
        window_start: Option<&str>,
        window_end: Option<&str>,
    ) -> Result<Vec<Transaction>, ServiceError> {
        let key = AggregationKey::agent_transactions(agent_id, window_start, window_end);
        if let Some(AggregateValue::Transactions(transactions)) = self.cache.get(&key) {
            return Ok(transactions);
        }

        let window = match (window_start, window_end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        };
        let transactions = self.store.agent_transactions(agent_id, window)?;
        self.cache
            .put_default(key, AggregateValue::Transactions(transactions.clone()));
        Ok(transactions)
    }

    /// Single transaction lookup scoped to its owner. Uncached.
    pub fn transaction_by_id(
        &self,
        transaction_id: &str,
        agent_id: &str,
    ) -> Result<Option<Transaction>, ServiceError> {
        Ok(self.store.transaction_by_id(transaction_id, agent_id)?)
    }

    /// Run the anomaly policy over the agent's trailing window.
    pub fn detect_suspicious_activity(
        &self,
        agent_id: &str,
    ) -> Result<AnomalyVerdict, ServiceError> {
        let observations = self
            .store
            .daily_observations(agent_id, ANOMALY_WINDOW_DAYS)?;
        Ok(anomaly::evaluate(&observations, self.anomaly_threshold))
    }
}
