use serde::Serialize;
use serde_json::Value;
use skypulse_mcp_types::JSONRPC_VERSION;
use skypulse_mcp_types::JSONRPCError;
use skypulse_mcp_types::JSONRPCErrorError;
use skypulse_mcp_types::JSONRPCMessage;
use skypulse_mcp_types::JSONRPCNotification;
use skypulse_mcp_types::JSONRPCResponse;
use skypulse_mcp_types::RequestId;
use tokio::sync::mpsc;
use tracing::warn;

/// Sends messages to the client.
#[derive(Clone)]
pub(crate) struct OutgoingMessageSender {
    sender: mpsc::Sender<OutgoingMessage>,
}

impl OutgoingMessageSender {
    pub(crate) fn new(sender: mpsc::Sender<OutgoingMessage>) -> Self {
        Self { sender }
    }

    pub(crate) async fn send_response<T: Serialize>(&self, id: RequestId, response: T) {
        let result = match serde_json::to_value(response) {
            Ok(result) => result,
            Err(err) => {
                self.send_error(
                    id,
                    JSONRPCErrorError::internal_error(format!(
                        "failed to serialize response: {err}"
                    )),
                )
                .await;
                return;
            }
        };

        self.send(OutgoingMessage::Response(OutgoingResponse { id, result }))
            .await;
    }

    pub(crate) async fn send_notification(&self, notification: OutgoingNotification) {
        self.send(OutgoingMessage::Notification(notification)).await;
    }

    pub(crate) async fn send_error(&self, id: RequestId, error: JSONRPCErrorError) {
        self.send(OutgoingMessage::Error(OutgoingError { id, error }))
            .await;
    }

    async fn send(&self, message: OutgoingMessage) {
        if self.sender.send(message).await.is_err() {
            warn!("client writer has shut down; dropping outgoing message");
        }
    }
}

/// Outgoing message from the server to the client.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutgoingMessage {
    Notification(OutgoingNotification),
    Response(OutgoingResponse),
    Error(OutgoingError),
}

impl From<OutgoingMessage> for JSONRPCMessage {
    fn from(val: OutgoingMessage) -> Self {
        use OutgoingMessage::*;
        match val {
            Notification(OutgoingNotification { method, params }) => {
                JSONRPCMessage::Notification(JSONRPCNotification {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    method,
                    params,
                })
            }
            Response(OutgoingResponse { id, result }) => JSONRPCMessage::Response(JSONRPCResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                result,
            }),
            Error(OutgoingError { id, error }) => JSONRPCMessage::Error(JSONRPCError {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                error,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutgoingNotification {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutgoingResponse {
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutgoingError {
    pub error: JSONRPCErrorError,
    pub id: RequestId,
}
