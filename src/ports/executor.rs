use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::{
    protocol::{METHOD_TOOLS_LIST, RpcResponse},
    tool::ServerRegistration,
};

/// Errors raised while managing or talking to a backend worker.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The configured command could not be launched
    #[error("Failed to spawn server {server_id}: {source}")]
    Spawn {
        server_id: String,
        #[source]
        source: std::io::Error,
    },

    /// No live process is tracked for the server
    #[error("Server {0} is not running")]
    NotRunning(String),

    /// No response arrived within the deadline
    #[error("Request to server {server_id} timed out after {timeout:?}")]
    Timeout { server_id: String, timeout: Duration },

    /// The process closed its stdout without producing a usable envelope
    #[error("Server {0} exited before responding")]
    ProcessExited(String),

    /// Output could not be parsed as a response envelope
    #[error("Malformed response from server {server_id}: {reason}")]
    MalformedResponse { server_id: String, reason: String },

    /// Pipe I/O failed
    #[error("I/O error talking to server {server_id}: {source}")]
    Io {
        server_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Snapshot of a tracked worker process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub server_id: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub requests: u64,
}

/// ToolExecutor defines the port (interface) for running backend workers.
///
/// An executor tracks at most one live process per server id. Implementations
/// must never let a misbehaving worker take the caller down: every failure is
/// reported as an [`ExecutorError`].
#[async_trait]
pub trait ToolExecutor: Send + Sync + 'static {
    /// Reuse the tracked live process for `server`, or spawn one.
    async fn start(&self, server: &ServerRegistration) -> ExecutorResult<ProcessInfo>;

    /// Send one request to a tracked process and wait for its response.
    ///
    /// A timeout fails the request but leaves the process running.
    async fn send(
        &self,
        server_id: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> ExecutorResult<RpcResponse>;

    /// Whether a live process is tracked for `server_id`.
    async fn is_tracked(&self, server_id: &str) -> bool;

    /// Issue a `tools/list` probe against the tracked process.
    ///
    /// Untracked servers report `false` without being spawned, and a failed
    /// probe never stops the process.
    async fn health_check(&self, server_id: &str, timeout: Duration) -> bool {
        if !self.is_tracked(server_id).await {
            return false;
        }
        match self.send(server_id, METHOD_TOOLS_LIST, None, timeout).await {
            Ok(response) => response.error.is_none(),
            Err(e) => {
                tracing::debug!(server = %server_id, error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Stop one process, escalating to a kill after `grace`.
    ///
    /// Returns `false` when nothing was tracked for `server_id`.
    async fn stop(&self, server_id: &str, grace: Duration) -> bool;

    /// Stop every tracked process concurrently within one shared timeout.
    async fn shutdown(&self, timeout: Duration);

    /// Currently tracked processes.
    async fn tracked(&self) -> Vec<ProcessInfo>;
}
