//! MCP wire types
//!
//! The Model Context Protocol is JSON-RPC 2.0 with line-delimited messages
//! on stdio; the handful of shapes this server speaks is written out by hand
//! rather than pulled from an SDK. Tool results travel as text content
//! carrying pretty-printed JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An incoming JSON-RPC message. `id` is absent for notifications.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outgoing reply; exactly one of `result` and `error` is set.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Protocol-level fault (parse error, unknown method, bad params).
/// Tool failures do NOT use this; they return a result with `isError`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }
}

/// What this server can do; tools only, no resources or prompts.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Payload of the `initialize` handshake reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// One entry of the `tools/list` catalog. The schema is plain JSON Schema
/// built by [`create_tool_schema`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<HashMap<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// A tool's reply: text content blocks plus the `isError` flag that marks
/// tool-level failures without failing the JSON-RPC call itself.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<TextContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn text(text: String) -> Self {
        Self {
            content: vec![TextContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: None,
        }
    }

    /// Serialize a JSON payload as the tool result.
    pub fn json(value: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string()))
    }

    /// A structured `{error, action}` payload, flagged as an error.
    pub fn error_json(value: &Value) -> Self {
        Self {
            content: vec![TextContent {
                content_type: "text".to_string(),
                text: serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string()),
            }],
            is_error: Some(true),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            content: vec![TextContent {
                content_type: "text".to_string(),
                text: message,
            }],
            is_error: Some(true),
        }
    }
}

/// One declared tool parameter: name, JSON type, description, required
pub type ParamSpec = (&'static str, &'static str, &'static str, bool);

/// Assemble the `inputSchema` object for a tool from its parameter specs.
pub fn create_tool_schema(properties: Vec<ParamSpec>) -> Value {
    let mut props = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, json_type, description, is_required) in properties {
        props.insert(
            name.to_string(),
            serde_json::json!({
                "type": json_type,
                "description": description
            }),
        );
        if is_required {
            required.push(name.to_string());
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_serialization_skips_absent_fields() {
        let response = JsonRpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({}));
        let raw = serde_json::to_string(&response).unwrap();
        assert!(raw.contains("\"result\""));
        assert!(!raw.contains("\"error\""));

        let response = JsonRpcResponse::error(Some(serde_json::json!(2)), -32601, "nope");
        let raw = serde_json::to_string(&response).unwrap();
        assert!(raw.contains("\"error\""));
        assert!(!raw.contains("\"result\""));
    }

    #[test]
    fn test_tool_schema_shape() {
        let schema = create_tool_schema(vec![
            ("endpoint", "string", "API endpoint path", true),
            ("top", "integer", "Max records", false),
        ]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["top"]["type"], "integer");
        assert_eq!(schema["required"], serde_json::json!(["endpoint"]));
    }

    #[test]
    fn test_error_result_is_flagged() {
        let result = CallToolResult::error_json(&serde_json::json!({"error": "x", "action": "y"}));
        assert_eq!(result.is_error, Some(true));
        assert!(result.content[0].text.contains("\"action\""));
    }
}
