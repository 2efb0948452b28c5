//! ballot-worker: drains the vote queue into MySQL and serves `/health` and
//! `/metrics` until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use ballot_cli::config::WorkerSettings;
use ballot_cli::http::{self, AppState};
use ballot_cli::telemetry;
use ballot_core::app::{HealthChecker, WorkerBuilder};
use ballot_core::observability::WorkerMetrics;
use ballot_core::ports::SystemClock;
use ballot_mysql::MySqlVoteStore;
use ballot_redis::RedisVoteQueue;
use miette::{IntoDiagnostic, WrapErr, miette};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "ballot-worker";

#[tokio::main]
async fn main() -> miette::Result<()> {
    let settings = WorkerSettings::from_env().into_diagnostic()?;
    telemetry::init(settings.log_format, "info")
        .map_err(|e| miette!("failed to install tracing subscriber: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        queue = %settings.worker.queue_key,
        "Starting {SERVICE_NAME}"
    );

    let queue = RedisVoteQueue::connect(&settings.redis)
        .await
        .into_diagnostic()
        .wrap_err("failed to connect to Redis")?;
    let store = MySqlVoteStore::connect(&settings.mysql)
        .await
        .into_diagnostic()
        .wrap_err("failed to connect to MySQL")?;
    store
        .ensure_schema()
        .await
        .into_diagnostic()
        .wrap_err("failed to create votes table")?;

    let queue = Arc::new(queue);
    let store = Arc::new(store);
    let clock = Arc::new(SystemClock);
    let metrics = Arc::new(WorkerMetrics::new());

    let worker = WorkerBuilder::new()
        .queue(queue.clone())
        .store(store.clone())
        .clock(clock.clone())
        .metrics(Arc::clone(&metrics))
        .config(settings.worker.clone())
        .build()
        .into_diagnostic()?
        .spawn(CancellationToken::new());

    let health = HealthChecker::new(SERVICE_NAME, queue, store.clone(), clock, metrics);
    let listener = TcpListener::bind(settings.listen_addr().into_diagnostic()?)
        .await
        .into_diagnostic()
        .wrap_err("failed to bind HTTP listener")?;
    let http_shutdown = CancellationToken::new();
    let mut server = tokio::spawn(http::serve(
        listener,
        AppState {
            health: Arc::new(health),
            queue_key: settings.worker.queue_key.clone(),
        },
        http_shutdown.clone(),
    ));

    let server_exited_early = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut server => {
            match result {
                Ok(Ok(())) => warn!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task failed"),
            }
            true
        }
    };

    info!("Shutting down worker");
    match worker.shutdown(settings.shutdown_grace).await {
        Some(stats) => info!(
            persisted = stats.persisted,
            decode_failures = stats.decode_failures,
            persist_failures = stats.persist_failures,
            "Worker stopped"
        ),
        None => warn!("Worker abandoned its in-flight vote"),
    }

    if !server_exited_early {
        http_shutdown.cancel();
        match tokio::time::timeout(Duration::from_secs(5), server).await {
            Ok(Ok(Err(e))) => error!(error = %e, "HTTP server failed during shutdown"),
            Err(_) => warn!("HTTP server did not stop in time"),
            _ => {}
        }
    }

    store.close().await;
    info!("Server exited");

    if server_exited_early {
        return Err(miette!("HTTP server exited before shutdown was requested"));
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
