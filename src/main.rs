//! FieldPay backend service host.
//!
//! Wires the transaction core (ledger, cache, commission, anomaly detection,
//! webhook delivery) and runs the background dispatch workers until a
//! shutdown signal arrives. The inbound transport layer mounts on top of
//! [`fieldpay_backend::app::AppState`]; this host owns process lifecycle.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldpay_backend::app::AppState;
use fieldpay_backend::models::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("🚀 FieldPay backend starting");

    let config = Config::from_env()?;
    let app = AppState::start(config)?;

    info!(
        db = %app.config.database_path,
        cache_ttl_secs = app.config.cache_ttl_secs,
        "✅ FieldPay core ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown signal received, draining dispatch queue");
    app.shutdown().await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldpay_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
