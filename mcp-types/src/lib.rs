//! JSON-RPC 2.0 envelopes and the subset of Model Context Protocol messages
//! served by `skypulse-mcp-server`.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;

pub const JSONRPC_VERSION: &str = "2.0";
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

pub const PARSE_ERROR_CODE: i64 = -32700;
pub const INVALID_REQUEST_ERROR_CODE: i64 = -32600;
pub const METHOD_NOT_FOUND_ERROR_CODE: i64 = -32601;
pub const INVALID_PARAMS_ERROR_CODE: i64 = -32602;
pub const INTERNAL_ERROR_CODE: i64 = -32603;

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

/// ID of a request, which can be either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => f.write_str(s),
            RequestId::Integer(i) => i.fmt(f),
        }
    }
}

/// Any message that can travel over the transport, in either direction.
///
/// Variant order matters for deserialization: a request carries both `id`
/// and `method`, a notification only `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCNotification {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCError {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCErrorError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JSONRPCErrorError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_REQUEST_ERROR_CODE,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND_ERROR_CODE,
            message: format!("method not found: {method}"),
            data: Some(json!({ "method": method })),
        }
    }

    pub fn invalid_params(method: &str, message: impl fmt::Display) -> Self {
        Self {
            code: INVALID_PARAMS_ERROR_CODE,
            message: format!("invalid params for {method}: {message}"),
            data: Some(json!({ "method": method })),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR_CODE,
            message: message.into(),
            data: None,
        }
    }
}

/// A client-to-server request with typed params and result.
pub trait ModelContextProtocolRequest {
    const METHOD: &'static str;
    type Params: DeserializeOwned + Serialize + Send + Sync + 'static;
    type Result: DeserializeOwned + Serialize + Send + Sync + 'static;
}

#[derive(Debug)]
pub enum InitializeRequest {}

impl ModelContextProtocolRequest for InitializeRequest {
    const METHOD: &'static str = "initialize";
    type Params = InitializeRequestParams;
    type Result = InitializeResult;
}

#[derive(Debug)]
pub enum PingRequest {}

impl ModelContextProtocolRequest for PingRequest {
    const METHOD: &'static str = "ping";
    type Params = Option<Value>;
    type Result = Value;
}

#[derive(Debug)]
pub enum ListToolsRequest {}

impl ModelContextProtocolRequest for ListToolsRequest {
    const METHOD: &'static str = "tools/list";
    type Params = Option<ListToolsRequestParams>;
    type Result = ListToolsResult;
}

#[derive(Debug)]
pub enum CallToolRequest {}

impl ModelContextProtocolRequest for CallToolRequest {
    const METHOD: &'static str = "tools/call";
    type Params = CallToolRequestParams;
    type Result = CallToolResult;
}

/// Requests this server understands, decoded from a raw [`JSONRPCRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    InitializeRequest(InitializeRequestParams),
    PingRequest(Option<Value>),
    ListToolsRequest(Option<ListToolsRequestParams>),
    CallToolRequest(CallToolRequestParams),
}

impl TryFrom<JSONRPCRequest> for ClientRequest {
    type Error = JSONRPCErrorError;

    fn try_from(request: JSONRPCRequest) -> Result<Self, Self::Error> {
        let JSONRPCRequest { method, params, .. } = request;
        match method.as_str() {
            InitializeRequest::METHOD => {
                parse_params::<InitializeRequest>(params).map(ClientRequest::InitializeRequest)
            }
            PingRequest::METHOD => {
                parse_params::<PingRequest>(params).map(ClientRequest::PingRequest)
            }
            ListToolsRequest::METHOD => {
                parse_params::<ListToolsRequest>(params).map(ClientRequest::ListToolsRequest)
            }
            CallToolRequest::METHOD => {
                parse_params::<CallToolRequest>(params).map(ClientRequest::CallToolRequest)
            }
            other => Err(JSONRPCErrorError::method_not_found(other)),
        }
    }
}

fn parse_params<R: ModelContextProtocolRequest>(
    params: Option<Value>,
) -> Result<R::Params, JSONRPCErrorError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|err| JSONRPCErrorError::invalid_params(R::METHOD, err))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Implementation {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Definition for a tool the client can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListToolsRequestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Severity of a `notifications/message` log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessageNotificationParams {
    pub level: LoggingLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    pub data: Value,
}

pub const LOGGING_MESSAGE_NOTIFICATION_METHOD: &str = "notifications/message";
pub const INITIALIZED_NOTIFICATION_METHOD: &str = "notifications/initialized";
pub const CANCELLED_NOTIFICATION_METHOD: &str = "notifications/cancelled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotificationParams {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolRequestParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    TextContent(TextContent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::TextContent(TextContent { text: text.into() })],
            is_error: None,
            structured_content: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: Some(true),
            ..Self::text(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> JSONRPCMessage {
        serde_json::from_str(line).expect("valid message")
    }

    #[test]
    fn classifies_incoming_messages() {
        assert!(matches!(
            parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#),
            JSONRPCMessage::Request(JSONRPCRequest { id: RequestId::Integer(1), .. })
        ));
        assert!(matches!(
            parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            JSONRPCMessage::Notification(_)
        ));
        assert!(matches!(
            parse(r#"{"jsonrpc":"2.0","id":"a","result":{}}"#),
            JSONRPCMessage::Response(JSONRPCResponse { id: RequestId::String(_), .. })
        ));
        assert!(matches!(
            parse(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32000,"message":"boom"}}"#),
            JSONRPCMessage::Error(_)
        ));
    }

    #[test]
    fn request_id_displays_without_quotes() {
        assert_eq!(RequestId::String("abc".into()).to_string(), "abc");
        assert_eq!(RequestId::Integer(7).to_string(), "7");
    }

    #[test]
    fn decodes_call_tool_request() {
        let JSONRPCMessage::Request(request) = parse(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"analyze_stock_posts","arguments":{"count":3}}}"#,
        ) else {
            panic!("expected request");
        };

        let decoded = ClientRequest::try_from(request).expect("known method");
        assert_eq!(
            decoded,
            ClientRequest::CallToolRequest(CallToolRequestParams {
                name: "analyze_stock_posts".to_string(),
                arguments: Some(json!({"count": 3})),
            })
        );
    }

    #[test]
    fn ping_and_tools_list_accept_missing_params() {
        let request = |method: &str| JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            method: method.to_string(),
            params: None,
        };

        assert_eq!(
            ClientRequest::try_from(request("ping")),
            Ok(ClientRequest::PingRequest(None))
        );
        assert_eq!(
            ClientRequest::try_from(request("tools/list")),
            Ok(ClientRequest::ListToolsRequest(None))
        );
    }

    #[test]
    fn unknown_method_and_bad_params_map_to_error_codes() {
        let unknown = ClientRequest::try_from(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            method: "resources/list".to_string(),
            params: None,
        })
        .unwrap_err();
        assert_eq!(unknown.code, METHOD_NOT_FOUND_ERROR_CODE);
        assert_eq!(unknown.data, Some(json!({"method": "resources/list"})));

        let bad_params = ClientRequest::try_from(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(2),
            method: "tools/call".to_string(),
            params: Some(json!({"arguments": {}})),
        })
        .unwrap_err();
        assert_eq!(bad_params.code, INVALID_PARAMS_ERROR_CODE);
    }

    #[test]
    fn call_tool_result_wire_shape() {
        let value = serde_json::to_value(CallToolResult::error("nope")).expect("serialize");
        assert_eq!(
            value,
            json!({
                "content": [{"type": "text", "text": "nope"}],
                "isError": true
            })
        );
    }

    #[test]
    fn response_serializes_with_version() {
        let message = JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(9),
            result: json!({}),
        });
        assert_eq!(
            serde_json::to_value(message).expect("serialize"),
            json!({"jsonrpc": "2.0", "id": 9, "result": {}})
        );
    }
}
