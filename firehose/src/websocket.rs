use std::sync::Once;

use async_trait::async_trait;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tracing::info;
use tracing::trace;
use url::Url;

use crate::commit::Frame;
use crate::error::FirehoseError;
use crate::error::Result;
use crate::session::FrameStream;
use crate::session::StreamConnector;

const DEFAULT_USER_AGENT: &str = concat!("skypulse/", env!("CARGO_PKG_VERSION"));

/// Installs the process-wide rustls crypto provider once.
///
/// rustls cannot pick a provider on its own when more than one backend is
/// compiled in.
pub fn ensure_rustls_crypto_provider() {
    static RUSTLS_PROVIDER_INIT: Once = Once::new();
    RUSTLS_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Opens real websocket connections to a relay or Jetstream instance.
#[derive(Debug, Clone)]
pub struct WebsocketConnector {
    user_agent: String,
}

impl Default for WebsocketConnector {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl WebsocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[async_trait]
impl StreamConnector for WebsocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FrameStream>> {
        ensure_rustls_crypto_provider();
        let url = websocket_url(endpoint)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| FirehoseError::connect(endpoint, format!("invalid request: {err}")))?;
        if let Ok(user_agent) = HeaderValue::from_str(&self.user_agent) {
            request.headers_mut().insert(USER_AGENT, user_agent);
        }

        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|err| FirehoseError::connect(endpoint, err.to_string()))?;
        info!(
            "connected to websocket: {url} (status {})",
            response.status()
        );
        Ok(Box::new(WebsocketFrameStream::new(stream)))
    }
}

fn websocket_url(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|err| FirehoseError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(FirehoseError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: format!("unsupported scheme `{scheme}`, expected ws or wss"),
        }),
    }
}

pub struct WebsocketFrameStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    is_closed: bool,
}

impl WebsocketFrameStream {
    pub fn new(inner: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            inner,
            is_closed: false,
        }
    }
}

#[async_trait]
impl FrameStream for WebsocketFrameStream {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            if self.is_closed {
                return None;
            }
            let message = match self.inner.next().await {
                Some(Ok(message)) => message,
                None | Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    self.is_closed = true;
                    return None;
                }
                Some(Err(err)) => {
                    self.is_closed = true;
                    return Some(Err(FirehoseError::Stream(format!(
                        "failed to read websocket message: {err}"
                    ))));
                }
            };

            match message {
                Message::Binary(bytes) => {
                    trace!("websocket binary frame: {} bytes", bytes.len());
                    return Some(Ok(Frame::Binary(bytes)));
                }
                Message::Text(text) => {
                    trace!("websocket text frame: {}", text.as_str());
                    return Some(Ok(Frame::Text(text.as_str().to_owned())));
                }
                Message::Ping(payload) => {
                    if let Err(err) = self.inner.send(Message::Pong(payload)).await {
                        self.is_closed = true;
                        return Some(Err(FirehoseError::Stream(format!(
                            "failed to answer websocket ping: {err}"
                        ))));
                    }
                }
                Message::Close(frame) => {
                    info!("websocket closed by remote: {frame:?}");
                    self.is_closed = true;
                    return None;
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.is_closed, true) {
            return Ok(());
        }
        match self.inner.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(FirehoseError::Close(err.to_string())),
        }
    }
}
