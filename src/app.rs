//! Application wiring and process lifecycle.
//!
//! All clients are constructed here and injected explicitly; there are no
//! ambient singletons. Shutdown closes the dispatch queue and waits for the
//! workers to drain in-flight jobs before returning.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::AggregationCache;
use crate::ledger::LedgerStore;
use crate::models::Config;
use crate::transactions::TransactionService;
use crate::webhooks::dispatcher::{DispatchJob, EventDispatcher};
use crate::webhooks::service::{HttpTransport, WebhookService};
use crate::webhooks::store::WebhookStore;

/// How often expired cache entries are physically swept
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub struct AppState {
    pub config: Config,
    pub ledger: Arc<LedgerStore>,
    pub cache: Arc<AggregationCache>,
    pub transactions: Arc<TransactionService>,
    pub webhooks: Arc<WebhookService>,
    job_tx: mpsc::Sender<DispatchJob>,
    workers: Vec<JoinHandle<()>>,
    purge_task: JoinHandle<()>,
}

impl AppState {
    /// Construct every component and spawn the background workers. Must run
    /// inside a tokio runtime.
    pub fn start(config: Config) -> Result<Self> {
        let ledger = Arc::new(
            LedgerStore::new(&config.database_path).context("failed to open ledger store")?,
        );
        let webhook_store = Arc::new(
            WebhookStore::new(&config.database_path)
                .context("failed to open webhook subscription store")?,
        );
        let transport = Arc::new(
            HttpTransport::new(Duration::from_secs(config.webhook_timeout_secs))
                .context("failed to build webhook HTTP client")?,
        );
        let webhooks = Arc::new(WebhookService::new(
            webhook_store,
            transport,
            config.webhook_failure_limit,
        ));
        let cache = Arc::new(AggregationCache::new(Duration::from_secs(
            config.cache_ttl_secs,
        )));

        let (job_tx, job_rx) = mpsc::channel(config.dispatch_queue_depth);
        let dispatcher =
            EventDispatcher::new(ledger.clone(), webhooks.clone(), config.anomaly_threshold);
        let workers = dispatcher.spawn_workers(job_rx, config.dispatch_workers);

        let transactions = Arc::new(TransactionService::new(
            ledger.clone(),
            cache.clone(),
            job_tx.clone(),
            config.anomaly_threshold,
        ));

        let purge_cache = cache.clone();
        let purge_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = purge_cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "expired cache entries swept");
                }
            }
        });

        info!(
            workers = config.dispatch_workers,
            queue_depth = config.dispatch_queue_depth,
            "application components wired"
        );

        Ok(Self {
            config,
            ledger,
            cache,
            transactions,
            webhooks,
            job_tx,
            workers,
            purge_task,
        })
    }

    /// Graceful shutdown: stop accepting jobs, drain the queue, stop
    /// maintenance.
    pub async fn shutdown(self) {
        drop(self.transactions);
        drop(self.job_tx);

        for handle in self.workers {
            if let Err(e) = handle.await {
                debug!(error = %e, "dispatch worker ended abnormally");
            }
        }
        self.purge_task.abort();

        info!("dispatch queue drained, shutdown complete");
    }
}
