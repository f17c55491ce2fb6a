//! Conversation State Machine
//!
//! The client-visible model of the chat: an append-only list of turns, a
//! single global loading flag, and reconciliation of inbound responses with
//! the submissions that triggered them.
//!
//! ## Turn Lifecycle
//!
//! ```text
//! submit("hello")                 inbound {success: true, message: "hi"}
//!     │                                    │
//!     ▼                                    ▼
//! Turn { outbound: "hello",  ──────►  Turn { outbound: "hello",
//!        response: "" }                      response: "hi" }
//! loading = true                      loading = false, ScrollToLatest
//! ```
//!
//! An inbound event with `success == false` completes nothing. It raises
//! [`ConversationSignal::AuthenticationRequired`] and clears the loading
//! flag; the turn stays pending.
//!
//! The transport does not tag requests, so responses are paired with turns
//! by a [`MatchStrategy`].

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::realtime::{InboundEvent, SessionHandle};

/// Signal channel capacity.
const SIGNAL_CAPACITY: usize = 64;

/// Outbound side of the transport as seen by the conversation.
pub trait Outbound: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Emit a message. Must not fail; dropping with a warning is allowed.
    fn send(&self, text: &str);
}

impl Outbound for SessionHandle {
    fn is_connected(&self) -> bool {
        SessionHandle::is_connected(self)
    }

    fn send(&self, text: &str) {
        SessionHandle::send(self, text)
    }
}

/// One user submission and its eventual response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: Uuid,
    pub outbound_text: String,
    /// Empty until a response is matched
    pub response_text: String,
    pub sent_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl Turn {
    fn new(outbound_text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound_text,
            response_text: String::new(),
            sent_at: Utc::now(),
            answered_at: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.answered_at.is_some()
    }
}

/// How an inbound response picks the turn it completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MatchStrategy {
    /// Oldest unanswered turn. N submissions and N responses complete every turn.
    #[default]
    #[value(alias = "fifo")]
    FirstPending,
    /// Most recent unanswered turn.
    LatestPending,
    /// Most recent unanswered turn whose text equals the last submitted text.
    CurrentText,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::FirstPending => "first-pending",
            MatchStrategy::LatestPending => "latest-pending",
            MatchStrategy::CurrentText => "current-text",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effects for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationSignal {
    /// The server rejected the session; prompt the user to sign in
    AuthenticationRequired,
    /// Bring the newest turn into view
    ScrollToLatest { turn_id: Option<Uuid> },
}

/// Point-in-time view published to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationSnapshot {
    pub turns: Vec<Turn>,
    pub loading: bool,
}

/// Turn sequence plus loading flag, bound to an outbound transport.
pub struct Conversation<S> {
    outbound: S,
    strategy: MatchStrategy,
    turns: Vec<Turn>,
    loading: bool,
    current_outbound: Option<String>,
    signals: broadcast::Sender<ConversationSignal>,
}

impl<S: Outbound> Conversation<S> {
    pub fn new(outbound: S, strategy: MatchStrategy) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            outbound,
            strategy,
            turns: Vec::new(),
            loading: false,
            current_outbound: None,
            signals,
        }
    }

    /// Record and emit a user submission.
    ///
    /// Returns the new turn's id, or `None` if the transport is not
    /// connected (nothing is recorded or sent then).
    pub fn submit(&mut self, text: impl Into<String>) -> Option<Uuid> {
        let text = text.into();
        if !self.outbound.is_connected() {
            warn!("Cannot submit message, socket not connected");
            return None;
        }

        let turn = Turn::new(text.clone());
        let id = turn.id;
        self.turns.push(turn);
        self.current_outbound = Some(text.clone());
        self.outbound.send(&text);
        self.loading = true;

        debug!(turn_id = %id, pending = self.pending_count(), "Turn submitted");
        Some(id)
    }

    /// Apply one inbound event. Returns the id of the completed turn, if any.
    pub fn apply(&mut self, event: &InboundEvent) -> Option<Uuid> {
        self.loading = false;

        if !event.success {
            info!("Server requires authentication");
            self.emit(ConversationSignal::AuthenticationRequired);
            return None;
        }

        let completed = match self.find_pending() {
            Some(index) => {
                let turn = &mut self.turns[index];
                turn.response_text = event.message.clone().unwrap_or_default();
                turn.answered_at = Some(Utc::now());
                debug!(turn_id = %turn.id, "Turn answered");
                Some(turn.id)
            }
            None => {
                debug!(strategy = %self.strategy, "Response matched no pending turn");
                None
            }
        };

        let latest = self.turns.last().map(|turn| turn.id);
        self.emit(ConversationSignal::ScrollToLatest { turn_id: latest });
        completed
    }

    fn find_pending(&self) -> Option<usize> {
        let mut pending = self
            .turns
            .iter()
            .enumerate()
            .filter(|(_, turn)| !turn.is_answered());

        match self.strategy {
            MatchStrategy::FirstPending => pending.next().map(|(i, _)| i),
            MatchStrategy::LatestPending => pending.last().map(|(i, _)| i),
            MatchStrategy::CurrentText => {
                let current = self.current_outbound.as_deref()?;
                pending
                    .filter(|(_, turn)| turn.outbound_text == current)
                    .last()
                    .map(|(i, _)| i)
            }
        }
    }

    fn emit(&self, signal: ConversationSignal) {
        // No receivers is fine.
        let _ = self.signals.send(signal);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn current_outbound(&self) -> Option<&str> {
        self.current_outbound.as_deref()
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    pub fn pending_count(&self) -> usize {
        self.turns.iter().filter(|turn| !turn.is_answered()).count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationSignal> {
        self.signals.subscribe()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            turns: self.turns.clone(),
            loading: self.loading,
        }
    }
}
