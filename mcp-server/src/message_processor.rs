use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use skypulse_mcp_types::CANCELLED_NOTIFICATION_METHOD;
use skypulse_mcp_types::CallToolRequestParams;
use skypulse_mcp_types::CallToolResult;
use skypulse_mcp_types::CancelledNotificationParams;
use skypulse_mcp_types::ClientRequest;
use skypulse_mcp_types::INITIALIZED_NOTIFICATION_METHOD;
use skypulse_mcp_types::Implementation;
use skypulse_mcp_types::InitializeRequestParams;
use skypulse_mcp_types::InitializeResult;
use skypulse_mcp_types::JSONRPCError;
use skypulse_mcp_types::JSONRPCErrorError;
use skypulse_mcp_types::JSONRPCNotification;
use skypulse_mcp_types::JSONRPCRequest;
use skypulse_mcp_types::JSONRPCResponse;
use skypulse_mcp_types::LATEST_PROTOCOL_VERSION;
use skypulse_mcp_types::ListToolsRequestParams;
use skypulse_mcp_types::ListToolsResult;
use skypulse_mcp_types::RequestId;
use skypulse_mcp_types::ServerCapabilities;
use skypulse_mcp_types::ToolsCapability;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::outgoing_message::OutgoingMessageSender;
use crate::tool_config::ANALYZE_STOCK_POSTS_TOOL_NAME;
use crate::tool_config::create_tool_for_analyze_stock_posts;
use crate::tool_runner::ToolContext;
use crate::tool_runner::run_analyze_stock_posts;

pub(crate) struct MessageProcessor {
    outgoing: OutgoingMessageSender,
    initialized: bool,
    tools: Arc<ToolContext>,
    running_requests: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
}

impl MessageProcessor {
    /// Create a new `MessageProcessor`, retaining a handle to the outgoing
    /// `Sender` so handlers can enqueue messages to be written to the client.
    pub(crate) fn new(outgoing: OutgoingMessageSender, tools: Arc<ToolContext>) -> Self {
        Self {
            outgoing,
            initialized: false,
            tools,
            running_requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) async fn process_request(&mut self, request: JSONRPCRequest) {
        let request_id = request.id.clone();
        let client_request = match ClientRequest::try_from(request) {
            Ok(client_request) => client_request,
            Err(error) => {
                tracing::warn!("rejecting request {request_id}: {}", error.message);
                self.outgoing.send_error(request_id, error).await;
                return;
            }
        };

        match client_request {
            ClientRequest::InitializeRequest(params) => {
                self.handle_initialize(request_id, params).await;
            }
            ClientRequest::PingRequest(_params) => {
                self.handle_ping(request_id).await;
            }
            ClientRequest::ListToolsRequest(params) => {
                self.handle_list_tools(request_id, params).await;
            }
            ClientRequest::CallToolRequest(params) => {
                self.handle_call_tool(request_id, params).await;
            }
        }
    }

    pub(crate) fn process_response(&mut self, response: JSONRPCResponse) {
        tracing::info!("<- response: {:?}", response);
    }

    pub(crate) async fn process_notification(&mut self, notification: JSONRPCNotification) {
        match notification.method.as_str() {
            INITIALIZED_NOTIFICATION_METHOD => {
                tracing::info!("notifications/initialized");
            }
            CANCELLED_NOTIFICATION_METHOD => {
                self.handle_cancelled_notification(notification.params)
                    .await;
            }
            method => {
                tracing::warn!("ignoring client notification: {method}");
            }
        }
    }

    pub(crate) fn process_error(&mut self, err: JSONRPCError) {
        tracing::error!("<- error: {:?}", err);
    }

    async fn handle_initialize(&mut self, id: RequestId, params: InitializeRequestParams) {
        tracing::info!("initialize -> params: {:?}", params);

        if self.initialized {
            self.outgoing
                .send_error(
                    id,
                    JSONRPCErrorError::invalid_request("initialize called more than once"),
                )
                .await;
            return;
        }

        tracing::info!(
            "client: {} {}",
            params.client_info.name,
            params.client_info.version
        );
        let result = InitializeResult {
            protocol_version: negotiate_protocol_version(&params.protocol_version),
            capabilities: ServerCapabilities {
                logging: Some(json!({})),
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: Implementation {
                name: "skypulse-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Bluesky Stock Sentiment".to_string()),
            },
            instructions: None,
        };

        self.initialized = true;
        self.outgoing.send_response(id, result).await;
    }

    async fn handle_ping(&self, id: RequestId) {
        tracing::info!("ping");
        self.outgoing.send_response(id, json!({})).await;
    }

    async fn handle_list_tools(&self, id: RequestId, params: Option<ListToolsRequestParams>) {
        tracing::trace!("tools/list -> {params:?}");
        let result = ListToolsResult {
            tools: vec![create_tool_for_analyze_stock_posts()],
            next_cursor: None,
        };

        self.outgoing.send_response(id, result).await;
    }

    async fn handle_call_tool(&self, id: RequestId, params: CallToolRequestParams) {
        tracing::info!("tools/call -> params: {:?}", params);
        let CallToolRequestParams { name, arguments } = params;

        match name.as_str() {
            ANALYZE_STOCK_POSTS_TOOL_NAME => {
                self.handle_tool_call_analyze_stock_posts(id, arguments)
                    .await;
            }
            _ => {
                let result = CallToolResult::error(format!("Unknown tool '{name}'"));
                self.outgoing.send_response(id, result).await;
            }
        }
    }

    async fn handle_tool_call_analyze_stock_posts(&self, id: RequestId, arguments: Option<Value>) {
        let cancel = CancellationToken::new();
        self.running_requests
            .lock()
            .await
            .insert(id.clone(), cancel.clone());

        let outgoing = self.outgoing.clone();
        let tools = Arc::clone(&self.tools);
        let running_requests = Arc::clone(&self.running_requests);

        // Collection can take up to a minute; keep the message loop free for
        // pings and cancellations.
        tokio::spawn(async move {
            run_analyze_stock_posts(id.clone(), arguments, tools, outgoing, cancel).await;
            running_requests.lock().await.remove(&id);
        });
    }

    async fn handle_cancelled_notification(&self, params: Option<Value>) {
        let params = match serde_json::from_value::<CancelledNotificationParams>(
            params.unwrap_or(Value::Null),
        ) {
            Ok(params) => params,
            Err(err) => {
                tracing::warn!("malformed notifications/cancelled: {err}");
                return;
            }
        };

        match self
            .running_requests
            .lock()
            .await
            .remove(&params.request_id)
        {
            Some(token) => {
                tracing::info!(
                    "cancelling request {}: {}",
                    params.request_id,
                    params.reason.as_deref().unwrap_or("no reason given")
                );
                token.cancel();
            }
            None => {
                tracing::warn!("no running request for id: {}", params.request_id);
            }
        }
    }
}

/// Echoes the client's version when it is one we speak, otherwise offers ours.
fn negotiate_protocol_version(requested: &str) -> String {
    const SUPPORTED: &[&str] = &["2024-11-05", "2025-03-26", LATEST_PROTOCOL_VERSION];
    if SUPPORTED.contains(&requested) {
        requested.to_string()
    } else {
        LATEST_PROTOCOL_VERSION.to_string()
    }
}
