//! Socket.IO Wire Protocol
//!
//! Single responsibility: encode and decode the text frames of Socket.IO v5
//! running over Engine.IO v4. No knowledge of connections or retries.
//!
//! # Frame Layout
//!
//! ```text
//! <engine type>[<socket type>][/<namespace>,][<ack id>][<json>]
//!
//! 0{"sid":..,"pingInterval":..}   engine open
//! 2 / 3                           engine ping / pong
//! 40{"ipAddress":..}              namespace connect (auth payload)
//! 44{"message":"not authorized"}  namespace connect error
//! 42["message", ...]              event
//! 41                              namespace disconnect
//! ```
//!
//! Binary attachments (socket types 5 and 6) are not used by the chat
//! backend and decode as [`Frame::Unsupported`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::ChatError;

/// Engine.IO protocol revision spoken by this client.
pub const ENGINE_IO_VERSION: &str = "4";

/// Default Socket.IO endpoint path.
pub const DEFAULT_PATH: &str = "/socket.io/";

/// Root namespace.
pub const ROOT_NAMESPACE: &str = "/";

/// Contents of the engine open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    /// How long the connection may stay silent before it is considered dead.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Server-to-client payload of the chat event.
///
/// `success == false` means the server rejected the session or a protected
/// action; otherwise `message` carries the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InboundEvent {
    pub fn response(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            success: false,
            message: None,
        }
    }
}

/// A decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connect { namespace: String, data: Option<Value> },
    Disconnect { namespace: String },
    Event { namespace: String, name: String, args: Vec<Value> },
    ConnectError { namespace: String, message: String },
    Unsupported(String),
}

/// Decode one WebSocket text frame.
pub fn decode(frame: &str) -> Result<Frame, ChatError> {
    let mut chars = frame.chars();
    let engine_type = chars
        .next()
        .ok_or_else(|| ChatError::Protocol("Empty frame".into()))?;
    let rest = chars.as_str();

    match engine_type {
        '0' => {
            let open: OpenHandshake = serde_json::from_str(rest)
                .map_err(|e| ChatError::Protocol(format!("Invalid open packet: {}", e)))?;
            Ok(Frame::Open(open))
        }
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_socket_packet(rest),
        '5' => Ok(Frame::Unsupported("upgrade".into())),
        '6' => Ok(Frame::Noop),
        other => Err(ChatError::Protocol(format!(
            "Unknown engine packet type '{}'",
            other
        ))),
    }
}

fn decode_socket_packet(packet: &str) -> Result<Frame, ChatError> {
    let mut chars = packet.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| ChatError::Protocol("Empty socket packet".into()))?;
    let (namespace, rest) = split_namespace(chars.as_str());

    // Ack ids are only meaningful for events and acks, but strip them
    // uniformly so the payload always starts at the JSON.
    let payload = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match socket_type {
        '0' => {
            let data = if payload.is_empty() {
                None
            } else {
                Some(parse_json(payload)?)
            };
            Ok(Frame::Connect { namespace, data })
        }
        '1' => Ok(Frame::Disconnect { namespace }),
        '2' => {
            let mut args = match parse_json(payload)? {
                Value::Array(args) => args,
                other => {
                    return Err(ChatError::Protocol(format!(
                        "Event payload is not an array: {}",
                        other
                    )))
                }
            };
            if args.is_empty() {
                return Err(ChatError::Protocol("Event without a name".into()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(ChatError::Protocol(format!(
                        "Event name is not a string: {}",
                        other
                    )))
                }
            };
            Ok(Frame::Event {
                namespace,
                name,
                args,
            })
        }
        '4' => {
            let message = match parse_json(payload).unwrap_or(Value::Null) {
                Value::String(message) => message,
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_string(),
                _ => "connection refused".to_string(),
            };
            Ok(Frame::ConnectError { namespace, message })
        }
        '3' => Ok(Frame::Unsupported("ack".into())),
        '5' | '6' => Ok(Frame::Unsupported("binary".into())),
        other => Err(ChatError::Protocol(format!(
            "Unknown socket packet type '{}'",
            other
        ))),
    }
}

/// Split an optional `/namespace,` prefix off a socket packet body.
fn split_namespace(body: &str) -> (String, &str) {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => (body[..idx].to_string(), &body[idx + 1..]),
            None => (body.to_string(), ""),
        }
    } else {
        (ROOT_NAMESPACE.to_string(), body)
    }
}

fn parse_json(payload: &str) -> Result<Value, ChatError> {
    serde_json::from_str(payload)
        .map_err(|e| ChatError::Protocol(format!("Invalid packet payload: {}", e)))
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == ROOT_NAMESPACE || namespace.is_empty() {
        String::new()
    } else {
        format!("{},", namespace)
    }
}

/// Engine pong, the reply to a server ping.
pub fn encode_pong() -> String {
    "3".to_string()
}

/// Namespace connect packet carrying the auth payload.
pub fn encode_connect<A: Serialize>(namespace: &str, auth: &A) -> Result<String, ChatError> {
    let auth = serde_json::to_string(auth)?;
    Ok(format!("40{}{}", namespace_prefix(namespace), auth))
}

/// Event packet: `42["<name>", <payload>]`.
pub fn encode_event(namespace: &str, name: &str, payload: &Value) -> Result<String, ChatError> {
    let body = serde_json::to_string(&Value::Array(vec![
        Value::String(name.to_string()),
        payload.clone(),
    ]))?;
    Ok(format!("42{}{}", namespace_prefix(namespace), body))
}

pub fn encode_disconnect(namespace: &str) -> String {
    format!("41{}", namespace_prefix(namespace))
}

/// Build the WebSocket endpoint for a Socket.IO server.
///
/// `http`/`https` map to `ws`/`wss`; the path defaults to `/socket.io/`.
pub fn socket_url(server_url: &str, path: &str) -> Result<Url, ChatError> {
    let mut url = Url::parse(server_url)
        .map_err(|e| ChatError::Config(format!("Invalid server URL '{}': {}", server_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChatError::Config(format!(
                "Unsupported server URL scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChatError::Config(format!("Cannot use scheme '{}'", scheme)))?;

    let path = path.trim_matches('/');
    let path = if path.is_empty() {
        DEFAULT_PATH.to_string()
    } else {
        format!("/{}/", path)
    };
    url.set_path(&path);
    url.set_query(Some(&format!(
        "EIO={}&transport=websocket",
        ENGINE_IO_VERSION
    )));
    Ok(url)
}
