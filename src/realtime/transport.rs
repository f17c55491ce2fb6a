//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to a WebSocket and send/receive text frames.
//! No knowledge of Socket.IO packets, authentication, or reconnection.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::ORIGIN, HeaderValue},
        protocol::Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;
use url::Url;

use crate::error::ChatError;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A connected WebSocket transport.
///
/// It can only be constructed via `Transport::connect()`.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
}

impl Transport {
    /// Connect to a WebSocket endpoint.
    ///
    /// Returns a Transport only when the upgrade has completed.
    pub async fn connect(url: &Url) -> Result<Self, ChatError> {
        debug!(url = %url, "Connecting to WebSocket");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Connection(format!("Failed to build request: {}", e)))?;

        if let Ok(origin) = HeaderValue::from_str(&origin_of(url)) {
            request.headers_mut().insert(ORIGIN, origin);
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| ChatError::Connection(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "WebSocket connected");
        Ok(Self { sink, stream })
    }

    /// Send a text frame.
    pub async fn send(&mut self, text: String) -> Result<(), ChatError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| ChatError::Connection(format!("Failed to send: {}", e)))
    }

    /// Receive the next text frame.
    ///
    /// Returns None if the connection is closed.
    /// Skips non-text messages (WebSocket ping/pong handled automatically).
    pub async fn recv(&mut self) -> Result<Option<String>, ChatError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(ChatError::Connection(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }

    /// Send a close frame. Errors are ignored; the peer may already be gone.
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

/// Browser-style `Origin` header value for the endpoint.
fn origin_of(url: &Url) -> String {
    let scheme = if url.scheme() == "wss" { "https" } else { "http" };
    let host = url.host_str().unwrap_or("localhost");
    match url.port() {
        Some(port) => format!("{}://{}:{}", scheme, host, port),
        None => format!("{}://{}", scheme, host),
    }
}
