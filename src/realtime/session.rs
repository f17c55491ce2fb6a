//! Socket Session
//!
//! Single responsibility: An authenticated, ready-to-use connection to the
//! chat backend.
//!
//! # The Key Abstraction
//!
//! A `Session` can ONLY be created via `Session::establish()`, which:
//! 1. Opens the WebSocket
//! 2. Completes the Engine.IO open and the namespace connect with the auth payload
//! 3. Only THEN returns a Session
//!
//! If you have a Session, you can emit chat messages. Sessions do NOT
//! reconnect; when the backend goes away the session is gone. The
//! [`TransportSession`](super::TransportSession) supervisor replaces it.
//!
//! The supervisor talks to sessions through the [`Connector`] and
//! [`Connection`] traits, so tests can drive it with scripted connections.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::auth::{Handshake, SessionAuth};
use super::protocol::{
    decode, encode_disconnect, encode_event, encode_pong, socket_url, Frame, InboundEvent,
    DEFAULT_PATH, ROOT_NAMESPACE,
};
use super::transport::Transport;
use crate::error::ChatError;
use crate::identity::ConnectionParams;

/// One live, authenticated connection.
#[async_trait]
pub trait Connection: Send {
    /// Emit a chat message.
    async fn send(&mut self, text: &str) -> Result<(), ChatError>;

    /// Next inbound chat event. `None` once the connection is gone.
    async fn recv(&mut self) -> Option<InboundEvent>;

    /// Close the connection. No events are delivered afterwards.
    async fn close(&mut self);
}

/// Opens connections for given parameters.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection + 'static;

    async fn connect(&self, params: &ConnectionParams) -> Result<Self::Connection, ChatError>;
}

/// Configuration for establishing a session.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Backend base URL (http, https, ws or wss)
    pub server_url: String,
    /// Socket.IO endpoint path
    pub path: String,
    /// Namespace to join
    pub namespace: String,
    /// Event name used in both directions
    pub event_name: String,
    /// Limit for WebSocket upgrade plus namespace handshake
    pub handshake_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3002".to_string(),
            path: DEFAULT_PATH.to_string(),
            namespace: ROOT_NAMESPACE.to_string(),
            event_name: "message".to_string(),
            handshake_timeout: Duration::from_secs(20),
        }
    }
}

/// An authenticated Socket.IO session with the chat backend.
pub struct Session {
    transport: Transport,
    handshake: Handshake,
    namespace: String,
    event_name: String,
    /// Connection counts as dead if nothing arrives before this instant
    deadline: Instant,
}

impl Session {
    /// Establish a new authenticated session.
    ///
    /// This method does not return until the server has accepted the
    /// namespace connect. If any step fails, no session exists.
    ///
    /// # Errors
    /// - `Config` if the server URL is unusable
    /// - `Connection` / `Timeout` if the backend is unreachable or slow
    /// - `Rejected` if the backend refuses the auth payload
    pub async fn establish(
        config: &SocketConfig,
        params: &ConnectionParams,
    ) -> Result<Self, ChatError> {
        let url = socket_url(&config.server_url, &config.path)?;
        info!(
            url = %url,
            origin = %params.origin_address(),
            authenticated = params.is_authenticated(),
            "Establishing socket session"
        );

        // One budget covers the upgrade and the namespace handshake.
        let handshake = tokio::time::timeout(config.handshake_timeout, async {
            let mut transport = Transport::connect(&url).await?;
            let auth = SessionAuth::new(params, config.namespace.clone());
            let handshake = auth.authenticate(&mut transport).await?;
            Ok::<_, ChatError>((transport, handshake))
        })
        .await
        .map_err(|_| {
            ChatError::Timeout(format!(
                "Socket handshake not finished within {:?}",
                config.handshake_timeout
            ))
        })??;
        let (transport, handshake) = handshake;

        Ok(Self {
            transport,
            deadline: Instant::now() + handshake.liveness_window,
            handshake,
            namespace: config.namespace.clone(),
            event_name: config.event_name.clone(),
        })
    }

    /// Engine session id assigned by the server.
    pub fn sid(&self) -> &str {
        &self.handshake.sid
    }

    /// Namespace socket id, when the server reported one.
    pub fn socket_id(&self) -> Option<&str> {
        self.handshake.socket_id.as_deref()
    }

    fn accepts(&self, namespace: &str, name: &str) -> bool {
        namespace == self.namespace && name == self.event_name
    }
}

#[async_trait]
impl Connection for Session {
    async fn send(&mut self, text: &str) -> Result<(), ChatError> {
        let frame = encode_event(
            &self.namespace,
            &self.event_name,
            &Value::String(text.to_string()),
        )?;
        self.transport.send(frame).await
    }

    async fn recv(&mut self) -> Option<InboundEvent> {
        loop {
            let text = match timeout_at(self.deadline, self.transport.recv()).await {
                Err(_) => {
                    warn!(sid = %self.handshake.sid, "Ping timeout, connection considered dead");
                    return None;
                }
                Ok(Err(e)) => {
                    warn!(sid = %self.handshake.sid, error = %e, "Socket read failed");
                    return None;
                }
                Ok(Ok(None)) => {
                    info!(sid = %self.handshake.sid, "Server closed the connection");
                    return None;
                }
                Ok(Ok(Some(text))) => text,
            };
            self.deadline = Instant::now() + self.handshake.liveness_window;

            match decode(&text) {
                Ok(Frame::Ping) => {
                    if let Err(e) = self.transport.send(encode_pong()).await {
                        warn!(error = %e, "Failed to answer ping");
                        return None;
                    }
                }
                Ok(Frame::Event {
                    namespace,
                    name,
                    args,
                }) if self.accepts(&namespace, &name) => {
                    let Some(payload) = args.into_iter().next() else {
                        warn!(event = %name, "Event without payload, skipping");
                        continue;
                    };
                    match serde_json::from_value::<InboundEvent>(payload) {
                        Ok(event) => return Some(event),
                        Err(e) => warn!(error = %e, "Malformed chat event, skipping"),
                    }
                }
                Ok(Frame::Disconnect { namespace }) if namespace == self.namespace => {
                    info!(sid = %self.handshake.sid, "Server disconnected the namespace");
                    return None;
                }
                Ok(Frame::Close) => {
                    info!(sid = %self.handshake.sid, "Server closed the engine session");
                    return None;
                }
                Ok(other) => debug!(frame = ?other, "Ignoring frame"),
                Err(e) => warn!(error = %e, "Undecodable frame, skipping"),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.transport.send(encode_disconnect(&self.namespace)).await {
            debug!(error = %e, "Disconnect packet not sent");
        }
        self.transport.close().await;
        debug!(sid = %self.handshake.sid, "Session closed");
    }
}

/// Opens real Socket.IO sessions.
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    config: SocketConfig,
}

impl SocketIoConnector {
    pub fn new(config: SocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    type Connection = Session;

    async fn connect(&self, params: &ConnectionParams) -> Result<Session, ChatError> {
        Session::establish(&self.config, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_config_default() {
        let config = SocketConfig::default();
        assert_eq!(config.server_url, "http://localhost:3002");
        assert_eq!(config.path, "/socket.io/");
        assert_eq!(config.namespace, "/");
        assert_eq!(config.event_name, "message");
        assert_eq!(config.handshake_timeout, Duration::from_secs(20));
    }
}
