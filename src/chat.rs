//! Chat Client
//!
//! Wires the identity resolver, the transport session and the conversation
//! together, with a lifecycle tied to the presentation layer: `mount()` when
//! the chat view appears, `unmount()` when it goes away.
//!
//! ## Tasks
//!
//! ```text
//! CredentialStore ──changes──► identity task ──params (watch)──► TransportSession
//!                                                                      │
//!                                  watch_conversation() ◄── inbound task ◄── InboundEvents
//! ```
//!
//! - The identity task resolves parameters on mount and again on every
//!   credential change. It publishes only when the parameters differ, so a
//!   no-op write to the store does not cost the connection.
//! - The inbound task applies every event to the conversation and publishes
//!   a fresh snapshot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::{
    Conversation, ConversationSignal, ConversationSnapshot, MatchStrategy,
};
use crate::identity::{ConnectionParams, IdentityResolver};
use crate::realtime::{
    ConnectionState, Connector, InboundEvents, ReconnectPolicy, SessionHandle, TransportSession,
};

/// Configuration for a mounted chat client
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub reconnect: ReconnectPolicy,
    pub match_strategy: MatchStrategy,
    /// How long `unmount()` waits for the inbound task to drain
    pub drain_timeout: Duration,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            match_strategy: MatchStrategy::default(),
            drain_timeout: Duration::from_secs(1),
        }
    }
}

type SharedConversation = Arc<RwLock<Conversation<SessionHandle>>>;

/// A mounted chat: one transport session and one conversation.
pub struct ChatClient {
    session: TransportSession,
    conversation: SharedConversation,
    snapshot_tx: Arc<watch::Sender<ConversationSnapshot>>,
    params_rx: watch::Receiver<Option<ConnectionParams>>,
    identity_task: Option<JoinHandle<()>>,
    inbound_task: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl ChatClient {
    /// Start the session and the background tasks.
    ///
    /// Must be called within a tokio runtime. Returns immediately; the
    /// connection comes up once the public address is known.
    pub fn mount<C: Connector>(
        connector: C,
        resolver: IdentityResolver,
        config: ChatClientConfig,
    ) -> Self {
        let (params_tx, params_rx) = watch::channel(None);
        let (session, events) =
            TransportSession::start(connector, params_rx.clone(), config.reconnect.clone());

        let conversation = Arc::new(RwLock::new(Conversation::new(
            session.handle(),
            config.match_strategy,
        )));
        let (snapshot_tx, _) = watch::channel(ConversationSnapshot::default());
        let snapshot_tx = Arc::new(snapshot_tx);

        let identity_task = tokio::spawn(run_identity(resolver, params_tx));
        let inbound_task = tokio::spawn(run_inbound(
            events,
            conversation.clone(),
            snapshot_tx.clone(),
        ));

        info!(strategy = %config.match_strategy, "Chat client mounted");

        Self {
            session,
            conversation,
            snapshot_tx,
            params_rx,
            identity_task: Some(identity_task),
            inbound_task: Some(inbound_task),
            drain_timeout: config.drain_timeout,
        }
    }

    /// Submit user text. Returns the turn id, or `None` when disconnected.
    pub async fn submit(&self, text: impl Into<String>) -> Option<Uuid> {
        let mut conversation = self.conversation.write().await;
        let id = conversation.submit(text)?;
        self.snapshot_tx.send_replace(conversation.snapshot());
        Some(id)
    }

    pub async fn snapshot(&self) -> ConversationSnapshot {
        self.conversation.read().await.snapshot()
    }

    /// Receiver that sees a new snapshot after every submission and event.
    pub fn watch_conversation(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn subscribe_signals(&self) -> broadcast::Receiver<ConversationSignal> {
        self.conversation.read().await.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.session.watch_state()
    }

    /// Parameters the session is currently bound to.
    pub fn connection_params(&self) -> Option<ConnectionParams> {
        self.params_rx.borrow().clone()
    }

    /// Stop the background tasks and close the connection.
    pub async fn unmount(mut self) {
        debug!("Unmounting chat client");
        if let Some(task) = self.identity_task.take() {
            task.abort();
        }

        self.session.shutdown().await;

        // The inbound stream ends once the supervisor is gone.
        if let Some(mut task) = self.inbound_task.take() {
            if tokio::time::timeout(self.drain_timeout, &mut task).await.is_err() {
                warn!("Inbound task did not finish in time, aborting");
                task.abort();
            }
        }
        info!("Chat client unmounted");
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(task) = self.identity_task.take() {
            task.abort();
        }
        if let Some(task) = self.inbound_task.take() {
            task.abort();
        }
    }
}

async fn run_identity(
    mut resolver: IdentityResolver,
    params_tx: watch::Sender<Option<ConnectionParams>>,
) {
    let mut changes = resolver.credentials().subscribe();

    loop {
        // Mark seen before resolving so a change during the lookup triggers
        // another round.
        let _ = changes.borrow_and_update();

        let params = resolver.resolve().await;
        params_tx.send_if_modified(|current| {
            if *current == params {
                false
            } else {
                info!(
                    authenticated = params.as_ref().is_some_and(|p| p.is_authenticated()),
                    "Connection parameters updated"
                );
                *current = params;
                true
            }
        });

        if changes.changed().await.is_err() {
            debug!("Credential store gone, identity task stopping");
            break;
        }
        debug!("Credential change observed, re-resolving");
    }
}

async fn run_inbound(
    mut events: InboundEvents,
    conversation: SharedConversation,
    snapshot_tx: Arc<watch::Sender<ConversationSnapshot>>,
) {
    while let Some(event) = events.recv().await {
        let mut conversation = conversation.write().await;
        conversation.apply(&event);
        snapshot_tx.send_replace(conversation.snapshot());
    }
    debug!("Inbound stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ChatClientConfig::default();
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.match_strategy, MatchStrategy::FirstPending);
        assert_eq!(config.drain_timeout, Duration::from_secs(1));
    }
}
