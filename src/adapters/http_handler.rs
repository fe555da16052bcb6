use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::health_checker::HealthMonitor,
    config::GatewayConfig,
    core::{GatewayService, protocol::GatewayResponse},
};

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// An HTTP surface that can be mounted on a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Surface {
    /// `POST /rpc`
    Rpc,
    /// `GET /healthz`
    Health,
    /// `GET /metrics`
    Metrics,
}

/// Group enabled surfaces by the port they are served on.
pub fn plan_listeners(config: &GatewayConfig) -> BTreeMap<u16, Vec<Surface>> {
    let mut plan: BTreeMap<u16, Vec<Surface>> = BTreeMap::new();
    plan.entry(config.port).or_default().push(Surface::Rpc);
    if config.health_enabled {
        plan.entry(config.effective_health_port())
            .or_default()
            .push(Surface::Health);
    }
    if config.metrics_enabled {
        plan.entry(config.effective_metrics_port())
            .or_default()
            .push(Surface::Metrics);
    }
    plan
}

/// Shared state behind the HTTP surfaces.
#[derive(Clone)]
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
    health: Arc<HealthMonitor>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>, health: Arc<HealthMonitor>) -> Self {
        Self { gateway, health }
    }

    /// Build an axum router serving `surfaces`.
    pub fn router(&self, surfaces: &[Surface]) -> Router {
        let mut router: Router<HttpHandler> = Router::new();
        for surface in surfaces {
            router = match surface {
                Surface::Rpc => router.route("/rpc", post(handle_rpc)),
                Surface::Health => router.route("/healthz", get(handle_health)),
                Surface::Metrics => router.route("/metrics", get(handle_metrics)),
            };
        }
        router
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.clone())
    }
}

async fn handle_rpc(State(handler): State<HttpHandler>, body: String) -> Json<GatewayResponse> {
    let response = match handler.gateway.handle_line(&body).await {
        Some(response) => response,
        None => GatewayResponse::error(None, "Parse error: empty request body"),
    };
    Json(response)
}

async fn handle_health(State(handler): State<HttpHandler>) -> Response {
    let report = handler.health.report().await;
    let status = if report.overall {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn handle_metrics(State(handler): State<HttpHandler>) -> Response {
    let body = handler.gateway.router().metrics().export();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}
