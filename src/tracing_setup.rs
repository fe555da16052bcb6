use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Build the level filter: `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Initialize structured logging.
///
/// Logs always go to stderr; stdout is reserved for the stdio transport.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = env_filter(level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?,
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(false))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?,
    }

    tracing::info!(level, ?format, "toolgate logging initialized");
    Ok(())
}

/// Span covering one routed tool call.
pub fn create_call_span(tool: &str, call_id: &str) -> tracing::Span {
    tracing::info_span!(
        "tool_call",
        tool.name = tool,
        call.id = call_id,
        server.id = tracing::field::Empty,
        fallback_used = tracing::field::Empty,
        cached = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Span covering one request sent to a backend worker.
pub fn create_backend_span(server_id: &str, method: &str) -> tracing::Span {
    tracing::info_span!(
        "backend_request",
        server.id = server_id,
        rpc.method = method,
        rpc.id = tracing::field::Empty,
    )
}
