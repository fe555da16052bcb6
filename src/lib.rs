//! Toolgate - a tool-invocation gateway.
//!
//! Toolgate accepts namespaced tool calls, resolves each one to a backend
//! worker through a priority-ordered policy table, supervises the worker as a
//! child process speaking line-delimited JSON-RPC, and returns a normalized
//! result. Successful results are cached with a TTL and every call is
//! accounted for in a Prometheus-style metrics registry.
//!
//! # Features
//! - Two tool namespaces: `app` (first-party, preferred) and `ext` (fallbacks)
//! - Policy rules (`allow` / `deny` / `fallback`) matched by tool pattern
//! - Lazily spawned, reused worker processes with per-call timeouts
//! - TTL cache with tag invalidation keyed on canonical request JSON
//! - Counters, gauges and histograms exported in the text exposition format
//! - `POST /rpc`, `GET /healthz`, `GET /metrics` and a stdio transport
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use toolgate::{
//!     GatewayService, ProcessExecutor, RouterConfig, ToolRegistry, ToolRouter,
//!     core::{Namespace, ServerRegistration, Tool},
//!     metrics::{GatewayMetrics, MetricsRegistry},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let registry = Arc::new(ToolRegistry::new());
//! registry.register_server(
//!     ServerRegistration::builder("search", Namespace::Ext)
//!         .command("python3")
//!         .arg("servers/search.py")
//!         .tool(Tool::new("search", "Search the web"))
//!         .build(),
//! );
//!
//! let metrics = Arc::new(GatewayMetrics::new(Arc::new(MetricsRegistry::new()))?);
//! let router = Arc::new(ToolRouter::new(
//!     registry,
//!     Arc::new(ProcessExecutor::new()),
//!     metrics,
//!     RouterConfig::default(),
//! ));
//! let gateway = GatewayService::new(router.clone());
//!
//! let response = gateway
//!     .handle_line(r#"{"method":"tools/call","params":{"name":"search","arguments":{"q":"rust"}}}"#)
//!     .await;
//! println!("{response:?}");
//! router.shutdown().await;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Business logic lives in `core`. Process management sits behind the
//! [`ports::ToolExecutor`] port with [`ProcessExecutor`] as the subprocess
//! adapter, so tests can substitute in-memory executors. HTTP and stdio
//! transports live in `adapters`.
//!
//! # Error Handling
//! Library errors are `thiserror` enums per concern. Tool call failures never
//! escape the router; they come back as a [`CallResult`] with `success: false`.
//! The binary uses `eyre::Result` with context.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HealthMonitor, HttpHandler, ProcessExecutor, StdioServer},
    core::{CallResult, GatewayService, RouterConfig, RouterError, ToolRegistry, ToolRouter},
    utils::GracefulShutdown,
};
