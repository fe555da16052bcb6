use std::{collections::BTreeMap, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;

use crate::{
    core::{CacheStats, ToolRouter},
    utils::graceful_shutdown::ShutdownToken,
};

/// Health of one registered server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Healthy,
    Unhealthy,
    /// Registered but not running; never affects the overall status.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub status: ServerStatus,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsHealth {
    pub families: usize,
    pub series: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthComponents {
    pub cache: Option<CacheStats>,
    pub metrics: MetricsHealth,
    pub servers: BTreeMap<String, ServerHealth>,
}

/// Body of `GET /healthz`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall: bool,
    pub timestamp: DateTime<Utc>,
    pub components: HealthComponents,
}

/// Probes running workers and keeps the latest result per server.
pub struct HealthMonitor {
    router: Arc<ToolRouter>,
    interval: Duration,
    last: ArcSwap<BTreeMap<String, ServerHealth>>,
}

impl HealthMonitor {
    pub fn new(router: Arc<ToolRouter>, interval: Duration) -> Self {
        Self {
            router,
            interval,
            last: ArcSwap::from_pointee(BTreeMap::new()),
        }
    }

    /// Result of the most recent probe round, keyed `{namespace}.{id}`.
    pub fn last_snapshot(&self) -> Arc<BTreeMap<String, ServerHealth>> {
        self.last.load_full()
    }

    /// Probe every registered server once.
    ///
    /// Servers without a live process are reported `idle` and are not
    /// started. Probes run concurrently.
    pub async fn check_all(&self) -> BTreeMap<String, ServerHealth> {
        let previous = self.last.load_full();
        let previous = &previous;
        let servers = self.router.registry().servers();

        let probes = servers.iter().map(|server| async move {
            let key = server.qualified_id();
            if !self.router.executor().is_tracked(&server.id).await {
                let last_check = previous.get(&key).and_then(|h| h.last_check);
                return (
                    key,
                    ServerHealth {
                        status: ServerStatus::Idle,
                        last_check,
                    },
                );
            }

            let healthy = self.router.check_server_health(&server.id).await;
            self.router.metrics().set_server_health(&server.id, healthy);
            if !healthy {
                tracing::warn!(server = %server.id, "Server failed health check");
            }
            let status = if healthy {
                ServerStatus::Healthy
            } else {
                ServerStatus::Unhealthy
            };
            (
                key,
                ServerHealth {
                    status,
                    last_check: Some(Utc::now()),
                },
            )
        });

        let current: BTreeMap<String, ServerHealth> = join_all(probes).await.into_iter().collect();
        self.last.store(Arc::new(current.clone()));
        current
    }

    /// Probe now and assemble the full report.
    pub async fn report(&self) -> HealthReport {
        let servers = self.check_all().await;
        let overall = servers
            .values()
            .all(|health| health.status != ServerStatus::Unhealthy);
        let (families, series) = self.router.metrics().registry().summary();

        HealthReport {
            overall,
            timestamp: Utc::now(),
            components: HealthComponents {
                cache: self.router.cache().map(|cache| cache.get_stats()),
                metrics: MetricsHealth { families, series },
                servers,
            },
        }
    }

    /// Probe on every interval tick until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting server health monitor"
        );
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately; workers are not up yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let servers = self.check_all().await;
                    tracing::debug!(servers = servers.len(), "Health check cycle completed");
                }
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("Health monitor stopping");
                    break;
                }
            }
        }
    }
}
