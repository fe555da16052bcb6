//! Gateway call protocol dispatch.
//!
//! The `GatewayService` turns protocol requests (`tools/call`, `tools/list`)
//! into router operations and router outcomes back into protocol responses.
//! It is transport agnostic; the HTTP and stdio adapters both feed it.
use std::sync::Arc;

use serde_json::Value;

use crate::core::{
    protocol::{
        CallMeta, GatewayRequest, GatewayResponse, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
        ToolCallRequest, result_to_content,
    },
    router::{CallResult, ToolRouter},
};

pub struct GatewayService {
    router: Arc<ToolRouter>,
}

impl GatewayService {
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<ToolRouter> {
        &self.router
    }

    /// Dispatch one parsed request.
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        let GatewayRequest { id, method, params } = request;
        match method.as_str() {
            METHOD_TOOLS_LIST => GatewayResponse::tools(id, self.router.list_tools()),
            METHOD_TOOLS_CALL => {
                let call = match params
                    .map(serde_json::from_value::<ToolCallRequest>)
                    .transpose()
                {
                    Ok(Some(call)) => call,
                    Ok(None) => {
                        return GatewayResponse::error(id, "Invalid request: missing params");
                    }
                    Err(e) => {
                        return GatewayResponse::error(id, format!("Invalid request: {e}"));
                    }
                };
                let outcome = self.router.route_and_execute(&call).await;
                call_response(id, outcome)
            }
            other => {
                tracing::debug!(method = %other, "Unknown gateway method");
                GatewayResponse::error(id, format!("Unknown method: {other}"))
            }
        }
    }

    /// Dispatch a raw JSON value, echoing its `id` even when it is malformed.
    pub async fn handle_value(&self, value: Value) -> GatewayResponse {
        let id = value.get("id").cloned();
        match serde_json::from_value::<GatewayRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => GatewayResponse::error(id, format!("Invalid request: {e}")),
        }
    }

    /// Dispatch one protocol line. Blank lines produce no response.
    pub async fn handle_line(&self, line: &str) -> Option<GatewayResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => Some(self.handle_value(value).await),
            Err(e) => Some(GatewayResponse::error(None, format!("Parse error: {e}"))),
        }
    }
}

fn call_response(id: Option<Value>, outcome: CallResult) -> GatewayResponse {
    let meta = CallMeta {
        server_id: outcome.server_id.clone(),
        fallback_used: outcome.fallback_used,
        cached: outcome.cached,
        execution_time_ms: outcome.execution_time.as_millis() as u64,
    };

    match (outcome.success, outcome.result, outcome.error) {
        (true, Some(result), _) => {
            let (content, is_error) = result_to_content(&result);
            GatewayResponse {
                id,
                content,
                is_error,
                meta: Some(meta),
                ..Default::default()
            }
        }
        (_, _, error) => {
            let message = error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Tool call failed".to_string());
            GatewayResponse {
                meta: Some(meta),
                ..GatewayResponse::error(id, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        adapters::ProcessExecutor,
        core::{
            registry::ToolRegistry,
            router::RouterConfig,
            tool::{Namespace, ServerRegistration, Tool},
        },
        metrics::{GatewayMetrics, MetricsRegistry},
    };

    fn service() -> GatewayService {
        let registry = Arc::new(ToolRegistry::new());
        registry.register_server(
            ServerRegistration::builder("core", Namespace::App)
                .command("worker")
                .tool(Tool::new("echo", "Echo input"))
                .build(),
        );
        let metrics = Arc::new(GatewayMetrics::new(Arc::new(MetricsRegistry::new())).unwrap());
        let router = ToolRouter::new(
            registry,
            Arc::new(ProcessExecutor::new()),
            metrics,
            RouterConfig::default(),
        );
        GatewayService::new(Arc::new(router))
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = service()
            .handle_value(json!({ "id": 4, "method": "tools/list" }))
            .await;
        assert_eq!(response.id, Some(json!(4)));
        let tools = response.tools.unwrap();
        assert_eq!(tools[0].name, "app.echo");
        assert_eq!(tools[0].description, "Echo input");
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_input() {
        let service = service();

        let unknown = service.handle_value(json!({ "id": "a", "method": "nope" })).await;
        assert!(unknown.is_error);
        assert_eq!(unknown.id, Some(json!("a")));
        assert!(unknown.text().contains("Unknown method"));

        let missing = service.handle_value(json!({ "method": "tools/call" })).await;
        assert!(missing.is_error);

        let garbage = service.handle_line("{not json").await.unwrap();
        assert!(garbage.text().starts_with("Parse error"));

        assert!(service.handle_line("   ").await.is_none());
    }

    #[tokio::test]
    async fn test_call_failure_is_wrapped() {
        let response = service()
            .handle_value(json!({
                "id": 1,
                "method": "tools/call",
                "params": { "name": "missing" }
            }))
            .await;
        assert!(response.is_error);
        assert_eq!(response.text(), "Tool not found: missing");
        assert!(!response.meta.unwrap().cached);
    }

    #[test]
    fn test_call_response_success_content() {
        let outcome = CallResult {
            success: true,
            result: Some(json!("hello")),
            error: None,
            execution_time: std::time::Duration::from_millis(12),
            server_id: Some("core".to_string()),
            fallback_used: false,
            cached: true,
        };
        let response = call_response(Some(json!(9)), outcome);
        assert!(!response.is_error);
        assert_eq!(response.text(), "hello");
        let meta = response.meta.unwrap();
        assert_eq!(meta.execution_time_ms, 12);
        assert!(meta.cached);
    }
}
