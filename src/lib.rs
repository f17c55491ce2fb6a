//! chat-realtime - Realtime chat client core
//!
//! Keeps a Socket.IO connection to a chat backend alive and reconciles the
//! displayed conversation with what was actually sent and answered.
//!
//! ## Architecture
//!
//! ```text
//! user text ─► Conversation ─► TransportSession ─► backend
//!                   ▲                 │
//!                   └─ InboundEvents ◄┘
//!
//! CredentialStore ─► IdentityResolver ─► ConnectionParams ─► TransportSession
//! ```
//!
//! - **Identity Resolver**: public address plus session credential
//! - **Transport Session**: one live connection, fixed-delay reconnection
//! - **Conversation**: turns, loading flag, response matching
//! - **Chat Client**: mount/unmount lifecycle tying the above together
//!
//! The account service and credential store are the collaborators that
//! sign the user in and out.

pub mod account;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod realtime;

pub use account::{AccountConfig, AccountService};
pub use chat::{ChatClient, ChatClientConfig};
pub use conversation::{
    Conversation, ConversationSignal, ConversationSnapshot, MatchStrategy, Outbound, Turn,
};
pub use credentials::{CredentialStore, MemoryCredentialStore, UserProfile};
pub use error::ChatError;
pub use identity::{
    ConnectionParams, HttpOriginLookup, IdentityResolver, OriginLookup, StaticOrigin,
};
pub use realtime::{
    ConnectionState, DisconnectReason, InboundEvent, ReconnectPolicy, SocketConfig,
    SocketIoConnector, TransportSession,
};
