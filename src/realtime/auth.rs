//! Connection Authentication
//!
//! Single responsibility: Turn a freshly opened transport into an
//! authenticated Socket.IO namespace connection.
//!
//! # Handshake Flow
//!
//! 1. **Engine open** - the server speaks first with `0{sid, pingInterval, ...}`
//! 2. **Namespace connect** - the client sends `40{"ipAddress": .., "token": ..}`
//! 3. **Verdict** - the server answers `40{sid}` (accepted) or
//!    `44{"message": ..}` (rejected by its auth middleware)
//!
//! Server pings that arrive while waiting are answered so a slow verdict
//! does not cost the connection.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::protocol::{decode, encode_connect, encode_pong, Frame, OpenHandshake};
use super::transport::Transport;
use crate::error::ChatError;
use crate::identity::{AuthPayload, ConnectionParams};

/// Result of a successful handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Engine session id
    pub sid: String,
    /// Namespace socket id assigned by the server
    pub socket_id: Option<String>,
    /// Silence allowed before the connection counts as dead
    pub liveness_window: Duration,
}

/// Auth context sent once, at connection establishment.
pub struct SessionAuth {
    payload: AuthPayload,
    namespace: String,
}

impl SessionAuth {
    pub fn new(params: &ConnectionParams, namespace: impl Into<String>) -> Self {
        Self {
            payload: params.auth_payload(),
            namespace: namespace.into(),
        }
    }

    /// Run the handshake on `transport`. The caller bounds it in time.
    ///
    /// # Errors
    /// - `Rejected` if the server refuses the auth payload
    /// - `Connection` if the transport closes mid-handshake
    pub async fn authenticate(&self, transport: &mut Transport) -> Result<Handshake, ChatError> {
        let open = await_open(transport).await?;
        debug!(sid = %open.sid, "Engine session opened");

        transport
            .send(encode_connect(&self.namespace, &self.payload)?)
            .await?;
        debug!(
            namespace = %self.namespace,
            with_token = self.payload.token.is_some(),
            "Namespace connect sent"
        );

        loop {
            let text = transport
                .recv()
                .await?
                .ok_or_else(|| ChatError::Connection("Closed during handshake".into()))?;

            match decode(&text)? {
                Frame::Connect { namespace, data } if namespace == self.namespace => {
                    let socket_id = data
                        .as_ref()
                        .and_then(|d| d.get("sid"))
                        .and_then(|sid| sid.as_str())
                        .map(str::to_owned);
                    info!(sid = %open.sid, socket_id = ?socket_id, "Namespace connected");
                    return Ok(Handshake {
                        sid: open.sid.clone(),
                        socket_id,
                        liveness_window: open.liveness_window(),
                    });
                }
                Frame::ConnectError { namespace, message } if namespace == self.namespace => {
                    warn!(reason = %message, "Server rejected connection");
                    return Err(ChatError::Rejected(message));
                }
                Frame::Ping => transport.send(encode_pong()).await?,
                Frame::Close => {
                    return Err(ChatError::Connection("Closed during handshake".into()))
                }
                other => debug!(frame = ?other, "Ignoring frame during handshake"),
            }
        }
    }
}

async fn await_open(transport: &mut Transport) -> Result<OpenHandshake, ChatError> {
    loop {
        let text = transport
            .recv()
            .await?
            .ok_or_else(|| ChatError::Connection("Closed before open packet".into()))?;

        match decode(&text)? {
            Frame::Open(open) => return Ok(open),
            Frame::Noop => continue,
            other => {
                return Err(ChatError::Protocol(format!(
                    "Expected open packet, got {:?}",
                    other
                )))
            }
        }
    }
}
