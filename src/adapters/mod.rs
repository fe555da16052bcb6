pub mod health_checker;
pub mod http_handler;
pub mod process_executor;
pub mod stdio_server;

/// Re-export commonly used types from adapters
pub use health_checker::{HealthMonitor, HealthReport, ServerHealth, ServerStatus};
pub use http_handler::{HttpHandler, METRICS_CONTENT_TYPE, Surface, plan_listeners};
pub use process_executor::ProcessExecutor;
pub use stdio_server::StdioServer;
