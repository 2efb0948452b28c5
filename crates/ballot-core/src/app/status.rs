//! Status - 依存先の疎通確認
//!
//! Read-only: pings the queue and the store independently and never touches
//! the processing loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::observability::WorkerMetrics;
use crate::ports::{Clock, VoteQueue, VoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub service: String,
    /// RFC 3339, seconds precision.
    pub timestamp: String,
    pub redis: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_error: Option<String>,
    pub database: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_error: Option<String>,
    pub status: HealthStatus,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

pub struct HealthChecker {
    service: String,
    queue: Arc<dyn VoteQueue>,
    store: Arc<dyn VoteStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<WorkerMetrics>,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        service: impl Into<String>,
        queue: Arc<dyn VoteQueue>,
        store: Arc<dyn VoteStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            service: service.into(),
            queue,
            store,
            clock,
            metrics,
            probe_timeout: Duration::from_secs(2),
        }
    }

    /// A probe slower than this counts as disconnected.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn queue(&self) -> &Arc<dyn VoteQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    /// Ping both dependencies concurrently and build the report.
    pub async fn check(&self) -> HealthReport {
        let timeout = self.probe_timeout;
        let (redis, database) = tokio::join!(
            probe(timeout, async { self.queue.ping().await.map_err(|e| e.to_string()) }),
            probe(timeout, async { self.store.ping().await.map_err(|e| e.to_string()) }),
        );

        let healthy = redis.is_ok() && database.is_ok();
        self.metrics.inc_health_check(healthy);

        let report = HealthReport {
            service: self.service.clone(),
            timestamp: self
                .clock
                .now()
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            redis: state_of(&redis),
            redis_error: redis.err(),
            database: state_of(&database),
            database_error: database.err(),
            status: if healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
        };
        debug!(status = ?report.status, "Health check");
        report
    }
}

async fn probe<F>(timeout: Duration, ping: F) -> Result<(), String>
where
    F: Future<Output = Result<(), String>>,
{
    match tokio::time::timeout(timeout, ping).await {
        Ok(result) => result,
        Err(_) => Err(format!("ping timed out after {}ms", timeout.as_millis())),
    }
}

fn state_of(result: &Result<(), String>) -> ConnectionState {
    match result {
        Ok(()) => ConnectionState::Connected,
        Err(_) => ConnectionState::Disconnected,
    }
}
