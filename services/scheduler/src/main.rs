//! Kafka broker scheduler.
//!
//! Runs the control loop that deploys and repairs a fixed set of Kafka
//! brokers, and serves the status and operator API next to it.

use std::sync::Arc;

use anyhow::{Context, Result};
use ksched_scheduler::{
    api, config,
    driver::MockDriver,
    state::AppState,
    store::{MemoryTaskStore, SqliteTaskStore, TaskStore},
    BrokerScheduler, SchedulerEvent, SchedulerWorker,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to KSCHED_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting kafka scheduler");
    info!(
        listen_addr = %config.listen_addr,
        service = %config.service.name,
        brokers = config.service.broker_count,
        placement = %config.service.placement,
        "Configuration loaded"
    );

    let store: Arc<dyn TaskStore> = if config.dev_mode {
        warn!("Dev mode: task state is kept in memory only");
        Arc::new(MemoryTaskStore::new())
    } else {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
        let path = config.data_dir.join("state.db");
        let store = SqliteTaskStore::open(&path)
            .with_context(|| format!("opening task store {}", path.display()))?;
        info!(path = %path.display(), "Task store opened");
        Arc::new(store)
    };

    if let Some(framework_id) = store.framework_id()? {
        info!(framework_id = %framework_id, "Found previous framework registration");
    }

    let scheduler = BrokerScheduler::new(&config, store.clone());
    let state = AppState::new(
        store,
        scheduler.requests(),
        scheduler.subscribe_plan(),
        scheduler.subscribe_recovery(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Callbacks from the cluster manager connection are fed into this channel.
    // Until a driver binding is wired in, calls are only logged.
    let (events_tx, events_rx) = mpsc::channel::<SchedulerEvent>(256);
    let worker = SchedulerWorker::new(scheduler, Box::new(MockDriver::logging_only()), events_rx);
    let worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    drop(events_tx);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Scheduler worker did not shut down in time");
    }

    info!("Kafka scheduler shutdown complete");
    Ok(())
}
