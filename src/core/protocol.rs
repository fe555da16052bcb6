//! Message shapes for the two protocols the gateway speaks.
//!
//! * The **gateway call protocol** (`tools/call`, `tools/list`) accepted from
//!   clients over HTTP or stdio.
//! * The **worker protocol**: line-delimited JSON-RPC 2.0 exchanged with
//!   backend processes over their stdin / stdout.
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_TOOLS_LIST: &str = "tools/list";

/// Outbound worker request. Field order is the serialized order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a worker response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Worker response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(Value::from(id)),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(Value::from(id)),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Whether this envelope answers request `id`. Envelopes without an id
    /// (one-shot workers) are accepted.
    pub fn answers(&self, id: u64) -> bool {
        match &self.id {
            None | Some(Value::Null) => true,
            Some(Value::Number(n)) => n.as_u64() == Some(id),
            Some(Value::String(s)) => s.parse::<u64>().ok() == Some(id),
            Some(_) => false,
        }
    }

    /// An envelope must carry either a result or an error.
    pub fn is_well_formed(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

/// Request accepted on the gateway call protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Entry of a `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Call bookkeeping returned alongside `tools/call` results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub fallback_used: bool,
    pub cached: bool,
    pub execution_time_ms: u64,
}

/// Response on the gateway call protocol.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<CallMeta>,
}

impl GatewayResponse {
    pub fn error(id: Option<Value>, message: impl Into<String>) -> Self {
        Self {
            id,
            content: vec![text_chunk(message)],
            is_error: true,
            ..Default::default()
        }
    }

    pub fn tools(id: Option<Value>, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            id,
            tools: Some(tools),
            ..Default::default()
        }
    }

    /// Concatenated text of every `text` chunk.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|chunk| chunk.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn text_chunk(text: impl Into<String>) -> Value {
    json!({ "type": "text", "text": text.into() })
}

/// Whether a worker `result` flags itself as a tool-level error.
pub fn is_error_result(result: &Value) -> bool {
    result
        .get("isError")
        .or_else(|| result.get("is_error"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Convert a worker `result` into content chunks.
///
/// Results that already carry a `content` array pass through; strings become
/// a single text chunk; anything else is rendered as JSON text.
pub fn result_to_content(result: &Value) -> (Vec<Value>, bool) {
    if let Some(chunks) = result.get("content").and_then(Value::as_array) {
        return (chunks.clone(), is_error_result(result));
    }
    match result {
        Value::String(text) => (vec![text_chunk(text.clone())], false),
        other => (vec![text_chunk(other.to_string())], false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_request_field_order() {
        let line = serde_json::to_string(&RpcRequest::new(7, "tools/list", None)).unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#);
    }

    #[test]
    fn test_response_answers_matching_id() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{}}"#).unwrap();
        assert!(response.answers(3));
        assert!(!response.answers(4));

        let anonymous: RpcResponse = serde_json::from_str(r#"{"result":"ok"}"#).unwrap();
        assert!(anonymous.answers(99));
        assert!(anonymous.is_well_formed());

        let empty: RpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert!(!empty.is_well_formed());
    }

    #[test]
    fn test_result_to_content() {
        let (chunks, is_error) = result_to_content(&json!({
            "content": [{ "type": "text", "text": "hi" }],
            "isError": true
        }));
        assert_eq!(chunks.len(), 1);
        assert!(is_error);

        let (chunks, _) = result_to_content(&json!("plain"));
        assert_eq!(chunks[0]["text"], "plain");

        let (chunks, _) = result_to_content(&json!({ "total": 3 }));
        assert_eq!(chunks[0]["text"], r#"{"total":3}"#);
    }

    #[test]
    fn test_gateway_response_serialization() {
        let response = GatewayResponse::error(Some(json!(1)), "boom");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["is_error"], true);
        assert_eq!(value["content"][0]["text"], "boom");
        assert!(value.get("tools").is_none());

        let ok = serde_json::to_value(GatewayResponse::tools(None, vec![])).unwrap();
        assert!(ok.get("is_error").is_none());
        assert_eq!(ok["tools"], json!([]));
    }
}
