//! Background event dispatch.
//!
//! The write path hands each recorded transaction to this queue and returns
//! immediately; workers deliver the `transaction.created` event, run the
//! anomaly scan over the agent's trailing window, and fan out
//! `agent.suspicious_activity` when the scan flags. Nothing that happens
//! here can fail the transaction caller.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::anomaly;
use crate::ledger::LedgerStore;
use crate::models::Transaction;
use crate::transactions::ANOMALY_WINDOW_DAYS;
use crate::webhooks::service::WebhookService;

pub const EVENT_TRANSACTION_CREATED: &str = "transaction.created";
pub const EVENT_SUSPICIOUS_ACTIVITY: &str = "agent.suspicious_activity";

/// One unit of background work, queued by the transaction write path.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub transaction: Transaction,
}

#[derive(Clone)]
pub struct EventDispatcher {
    ledger: Arc<LedgerStore>,
    webhooks: Arc<WebhookService>,
    anomaly_threshold: f64,
}

impl EventDispatcher {
    pub fn new(
        ledger: Arc<LedgerStore>,
        webhooks: Arc<WebhookService>,
        anomaly_threshold: f64,
    ) -> Self {
        Self {
            ledger,
            webhooks,
            anomaly_threshold,
        }
    }

    /// Spawn worker tasks draining a shared receiver. Workers exit once the
    /// sender side is dropped and the queue is empty, which is how shutdown
    /// drains in-flight jobs.
    pub fn spawn_workers(
        self,
        rx: mpsc::Receiver<DispatchJob>,
        worker_count: usize,
    ) -> Vec<JoinHandle<()>> {
        let shared_rx = Arc::new(Mutex::new(rx));
        let workers = worker_count.max(1);

        (0..workers)
            .map(|i| {
                let dispatcher = self.clone();
                let rx = shared_rx.clone();
                tokio::spawn(async move {
                    loop {
                        let job_opt = { rx.lock().await.recv().await };
                        let Some(job) = job_opt else {
                            break;
                        };
                        dispatcher.process_job(job).await;
                    }
                    debug!(worker = i, "dispatch worker stopped");
                })
            })
            .collect()
    }

    async fn process_job(&self, job: DispatchJob) {
        let agent_id = job.transaction.agent_id.clone();

        let data = match serde_json::to_value(&job.transaction) {
            Ok(data) => data,
            Err(e) => {
                warn!(agent_id, error = %e, "transaction payload serialization failed");
                return;
            }
        };

        self.webhooks
            .notify_all(&agent_id, EVENT_TRANSACTION_CREATED, &data)
            .await;

        let observations = match self.ledger.daily_observations(&agent_id, ANOMALY_WINDOW_DAYS) {
            Ok(observations) => observations,
            Err(e) => {
                warn!(agent_id, error = %e, "anomaly scan skipped, observations unavailable");
                return;
            }
        };

        let verdict = anomaly::evaluate(&observations, self.anomaly_threshold);
        if verdict.flagged {
            let payload = json!({
                "agent_id": agent_id,
                "reason": verdict.reason,
                "observed": verdict.observed,
                "baseline_count": verdict.baseline_count,
                "baseline_amount": verdict.baseline_amount,
                "threshold": verdict.threshold,
            });
            self.webhooks
                .notify_all(&agent_id, EVENT_SUSPICIOUS_ACTIVITY, &payload)
                .await;
        }
    }
}
