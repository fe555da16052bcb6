//! Tool call routing: resolution, cache lookup, dispatch to a backend worker.
//!
//! [`ToolRouter::route_and_execute`] is the single entry point for
//! `tools/call`. It never panics and never returns `Err`; every failure is
//! folded into a [`CallResult`] with `success: false` so a misbehaving backend
//! cannot take the gateway down with it.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    core::{
        cache::{Cache, CacheOptions},
        protocol::{
            METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, ToolCallRequest, ToolDescriptor,
            is_error_result,
        },
        registry::{RegistryEvent, ToolRegistry},
        tool::{ServerRegistration, Tool, ToolRegistration, split_tool_name},
    },
    metrics::GatewayMetrics,
    ports::executor::{ExecutorError, ToolExecutor},
    tracing_setup,
};

/// Failures a routed tool call can end with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouterError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool {tool} is denied by policy (candidates: {})", .candidates.join(", "))]
    PolicyDenied {
        tool: String,
        candidates: Vec<String>,
    },

    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("Failed to start server {server_id}: {message}")]
    Spawn { server_id: String, message: String },

    #[error("Tool call to server {server_id} timed out after {timeout:?}")]
    Timeout { server_id: String, timeout: Duration },

    #[error("Malformed response from server {server_id}: {reason}")]
    MalformedResponse { server_id: String, reason: String },

    #[error("Server {0} exited before responding")]
    ProcessExited(String),

    #[error("Backend error {code}: {message}")]
    Backend { code: i64, message: String },

    #[error("I/O error talking to server {server_id}: {message}")]
    Io { server_id: String, message: String },
}

impl From<ExecutorError> for RouterError {
    fn from(error: ExecutorError) -> Self {
        match error {
            ExecutorError::Spawn { server_id, source } => RouterError::Spawn {
                server_id,
                message: source.to_string(),
            },
            ExecutorError::NotRunning(server_id) => RouterError::ServerUnavailable(server_id),
            ExecutorError::Timeout { server_id, timeout } => {
                RouterError::Timeout { server_id, timeout }
            }
            ExecutorError::ProcessExited(server_id) => RouterError::ProcessExited(server_id),
            ExecutorError::MalformedResponse { server_id, reason } => {
                RouterError::MalformedResponse { server_id, reason }
            }
            ExecutorError::Io { server_id, source } => RouterError::Io {
                server_id,
                message: source.to_string(),
            },
        }
    }
}

/// Outcome of one routed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<RouterError>,
    pub execution_time: Duration,
    pub server_id: Option<String>,
    pub fallback_used: bool,
    pub cached: bool,
}

impl CallResult {
    fn failure(error: RouterError, started: Instant) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            execution_time: started.elapsed(),
            server_id: None,
            fallback_used: false,
            cached: false,
        }
    }
}

/// Timeouts used by the router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub health_check_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            health_check_timeout: Duration::from_secs(2),
        }
    }
}

/// `tool` label for calls that never resolved to a registration.
pub const UNRESOLVED_TOOL_LABEL: &str = "unresolved";

/// Chosen target for a call.
struct Target {
    registration: ToolRegistration,
    server: ServerRegistration,
    fallback_used: bool,
}

pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    executor: Arc<dyn ToolExecutor>,
    metrics: Arc<GatewayMetrics>,
    cache: Option<Arc<Cache<Value>>>,
    config: RouterConfig,
}

impl ToolRouter {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: Arc<dyn ToolExecutor>,
        metrics: Arc<GatewayMetrics>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            metrics,
            cache: None,
            config,
        }
    }

    /// Serve repeated successful calls from `cache`.
    ///
    /// Entries of a server are dropped when it is registered again or
    /// unregistered; a new policy clears the whole cache.
    pub fn with_cache(mut self, cache: Arc<Cache<Value>>) -> Self {
        let invalidated = cache.clone();
        self.registry.on_update(move |event| match event {
            RegistryEvent::ServerRegistered { server_id, .. }
            | RegistryEvent::ServerUnregistered { server_id } => {
                let removed = invalidated.invalidate_by_tag(server_id);
                tracing::debug!(server = %server_id, removed, "Invalidated cached results");
            }
            RegistryEvent::PolicyAdded { tool_pattern } => {
                invalidated.clear();
                tracing::debug!(pattern = %tool_pattern, "Policy added, cache cleared");
            }
        });
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<dyn ToolExecutor> {
        &self.executor
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn cache(&self) -> Option<&Arc<Cache<Value>>> {
        self.cache.as_ref()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Resolve, dispatch and account for one tool call.
    pub async fn route_and_execute(&self, request: &ToolCallRequest) -> CallResult {
        let call_id = Uuid::new_v4().to_string();
        let span = tracing_setup::create_call_span(&request.name, &call_id);
        async move {
            let started = Instant::now();
            let result = self.execute(request, started).await;

            let span = tracing::Span::current();
            if let Some(server_id) = &result.server_id {
                span.record("server.id", server_id.as_str());
            }
            span.record("fallback_used", result.fallback_used);
            span.record("cached", result.cached);
            span.record("duration_ms", result.execution_time.as_millis() as u64);

            if let Some(error) = &result.error {
                tracing::warn!(tool = %request.name, error = %error, "Tool call failed");
            } else {
                tracing::debug!(
                    tool = %request.name,
                    server = ?result.server_id,
                    cached = result.cached,
                    elapsed_ms = result.execution_time.as_millis() as u64,
                    "Tool call completed"
                );
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, request: &ToolCallRequest, started: Instant) -> CallResult {
        let arguments = match validate(request) {
            Ok(arguments) => arguments,
            Err(e) => return CallResult::failure(e, started),
        };

        let target = match self.select_target(&request.name) {
            Ok(target) => target,
            Err(e) => {
                self.metrics
                    .record_tool_call(UNRESOLVED_TOOL_LABEL, false, false, started.elapsed());
                return CallResult::failure(e, started);
            }
        };
        let tool_key = target.registration.key();
        let server_id = target.server.id.clone();

        let cache_key = Cache::<Value>::key_for(
            METHOD_TOOLS_CALL,
            &json!({ "tool": tool_key, "server": server_id, "arguments": arguments }),
        );
        if let Some(cache) = &self.cache {
            let hit = cache.get(&cache_key);
            self.metrics.record_cache_lookup(hit.is_some());
            if let Some(value) = hit {
                let elapsed = started.elapsed();
                self.metrics
                    .record_tool_call(&tool_key, true, target.fallback_used, elapsed);
                return CallResult {
                    success: true,
                    result: Some(value),
                    error: None,
                    execution_time: elapsed,
                    server_id: Some(server_id),
                    fallback_used: target.fallback_used,
                    cached: true,
                };
            }
        }

        let outcome = self
            .dispatch(&target, arguments)
            .instrument(tracing_setup::create_backend_span(&server_id, METHOD_TOOLS_CALL))
            .await;
        let elapsed = started.elapsed();
        self.metrics
            .record_tool_call(&tool_key, outcome.is_ok(), target.fallback_used, elapsed);

        match outcome {
            Ok(value) => {
                if let Some(cache) = self.cache.as_ref().filter(|_| !is_error_result(&value)) {
                    cache.set(
                        cache_key,
                        value.clone(),
                        CacheOptions::default()
                            .with_tag(server_id.clone())
                            .with_tag(format!("tool:{tool_key}")),
                    );
                }
                CallResult {
                    success: true,
                    result: Some(value),
                    error: None,
                    execution_time: elapsed,
                    server_id: Some(server_id),
                    fallback_used: target.fallback_used,
                    cached: false,
                }
            }
            Err(error) => CallResult {
                server_id: Some(server_id),
                fallback_used: target.fallback_used,
                ..CallResult::failure(error, started)
            },
        }
    }

    /// Apply namespace policy and pick the registration to execute.
    fn select_target(&self, requested: &str) -> Result<Target, RouterError> {
        let (qualifier, bare) = split_tool_name(requested);
        let resolution = self.registry.resolve_tool(bare);

        if resolution.is_missing() {
            return Err(RouterError::ToolNotFound(requested.to_string()));
        }
        if resolution.is_denied() {
            let candidates: Vec<String> = resolution
                .candidates()
                .map(|r| format!("{} ({})", r.key(), r.server_id))
                .collect();
            tracing::warn!(
                tool = %requested,
                candidates = ?candidates,
                rule = ?resolution.rule.as_ref().map(|r| &r.tool_pattern),
                "Tool call denied by policy"
            );
            return Err(RouterError::PolicyDenied {
                tool: requested.to_string(),
                candidates,
            });
        }

        let chosen = match qualifier {
            Some(namespace) => resolution
                .candidates()
                .find(|r| r.namespace == namespace)
                .cloned()
                .ok_or_else(|| RouterError::ToolNotFound(requested.to_string()))?,
            None => resolution
                .registration
                .clone()
                .or_else(|| resolution.fallback_options.first().cloned())
                .ok_or_else(|| RouterError::ToolNotFound(requested.to_string()))?,
        };
        let fallback_used = resolution
            .registration
            .as_ref()
            .is_none_or(|primary| primary.key() != chosen.key() || primary.server_id != chosen.server_id);
        if fallback_used {
            tracing::info!(
                tool = %requested,
                using = %chosen.key(),
                server = %chosen.server_id,
                "Using fallback registration"
            );
        }

        // The registration may have been replaced since resolution.
        let server = self
            .registry
            .get_server(&chosen.server_id)
            .ok_or_else(|| RouterError::ServerUnavailable(chosen.server_id.clone()))?;

        Ok(Target {
            registration: chosen,
            server,
            fallback_used,
        })
    }

    async fn dispatch(&self, target: &Target, arguments: Value) -> Result<Value, RouterError> {
        self.executor.start(&target.server).await?;

        let params = json!({ "name": target.registration.name, "arguments": arguments });
        let response = self
            .executor
            .send(
                &target.server.id,
                METHOD_TOOLS_CALL,
                Some(params),
                self.config.request_timeout,
            )
            .await?;

        if let Some(error) = response.error {
            return Err(RouterError::Backend {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Tools across both namespaces, named `{namespace}.{tool}`.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry
            .list_tools()
            .into_iter()
            .map(|registration| ToolDescriptor {
                name: registration.key(),
                description: registration.tool.description.clone(),
                input_schema: registration.tool.input_schema.clone(),
            })
            .collect()
    }

    /// Ask a running server for its tool list (used for servers that
    /// declare none up front). Starts the server if needed.
    pub async fn discover_tools(&self, server: &ServerRegistration) -> Result<Vec<Tool>, RouterError> {
        self.executor.start(server).await?;
        let response = self
            .executor
            .send(&server.id, METHOD_TOOLS_LIST, None, self.config.request_timeout)
            .await?;
        if let Some(error) = response.error {
            return Err(RouterError::Backend {
                code: error.code,
                message: error.message,
            });
        }

        let tools = response
            .result
            .as_ref()
            .and_then(|result| result.get("tools"))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(tools).map_err(|e| RouterError::MalformedResponse {
            server_id: server.id.clone(),
            reason: format!("invalid tools list: {e}"),
        })
    }

    /// Probe a tracked server; untracked servers report `false`.
    pub async fn check_server_health(&self, server_id: &str) -> bool {
        self.executor
            .health_check(server_id, self.config.health_check_timeout)
            .await
    }

    /// Drop cached results produced by a server.
    pub fn invalidate_server(&self, server_id: &str) -> usize {
        match &self.cache {
            Some(cache) => cache.invalidate_by_tag(server_id),
            None => 0,
        }
    }

    /// Stop every tracked worker within the shared shutdown timeout.
    pub async fn shutdown(&self) {
        tracing::info!(
            timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
            "Shutting down tool router"
        );
        self.executor.shutdown(self.config.shutdown_timeout).await;
    }
}

fn validate(request: &ToolCallRequest) -> Result<Value, RouterError> {
    if request.name.trim().is_empty() {
        return Err(RouterError::InvalidRequest("tool name must not be empty".to_string()));
    }
    match &request.arguments {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(Value::Object(arguments)) => Ok(Value::Object(arguments.clone())),
        Some(other) => Err(RouterError::InvalidRequest(format!(
            "arguments must be an object, got {}",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
