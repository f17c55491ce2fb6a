//! Realtime Chat Connection Module
//!
//! This module keeps a Socket.IO connection to the chat backend alive.
//!
//! # Architecture
//!
//! The module is organized by concern, with each submodule having a single responsibility:
//!
//! | Module      | Responsibility                                      |
//! |-------------|-----------------------------------------------------|
//! | `transport` | WebSocket connect/send/receive                      |
//! | `protocol`  | Engine.IO / Socket.IO packet encoding               |
//! | `auth`      | Namespace handshake with the auth payload           |
//! | `session`   | An authenticated, ready-to-use connection           |
//! | `client`    | Supervisor with fixed-delay automatic reconnection  |
//!
//! # Key Design Principles
//!
//! ## 1. Make Invalid States Unrepresentable
//!
//! - `Session` can only be created via `Session::establish()`
//! - `establish()` does not return until the namespace connect is accepted
//! - If you have a `Session`, you can emit chat messages
//!
//! ## 2. One Owner Per Connection
//!
//! - The supervisor task is the only holder of the live handle
//! - Callers talk to it through channels, never through shared flags
//! - A parameter change closes the old handle before the new one opens,
//!   so events from a stale connection never reach the conversation
//!
//! # Usage
//!
//! ```ignore
//! use chat_realtime::realtime::{ReconnectPolicy, SocketConfig, SocketIoConnector, TransportSession};
//!
//! let connector = SocketIoConnector::new(SocketConfig::default());
//! let (session, mut events) = TransportSession::start(connector, params_rx, ReconnectPolicy::default());
//!
//! session.send("hello");
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event.message);
//! }
//! ```

// Internal modules - not exposed publicly
mod auth;
mod protocol;
mod transport;

// Public modules
mod client;
mod session;

// Re-export the public API
pub use client::{
    ConnectionState, DisconnectReason, InboundEvents, ReconnectPolicy, SessionHandle,
    TransportSession, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
pub use protocol::InboundEvent;
pub use session::{Connection, Connector, Session, SocketConfig, SocketIoConnector};
