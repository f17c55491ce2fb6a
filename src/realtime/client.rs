//! Transport Session with Automatic Reconnection
//!
//! Single responsibility: Keep at most one healthy connection open for the
//! current connection parameters, reconnecting as needed.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  TransportSession                       │
//! │  - send(), is_connected(), state()                      │
//! │  - owns the supervisor task                             │
//! └────────────────────────────────────────────────────────┘
//!          │ commands (mpsc)          ▲ state (watch)
//!          ▼                          │ inbound events (mpsc)
//! ┌────────────────────────────────────────────────────────┐
//! │                     Supervisor                          │
//! │  - sole owner of the connection handle                  │
//! │  - reconnect state machine                              │
//! │  - reacts to parameter changes (watch)                  │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//!                  Connector / Connection
//! ```
//!
//! # Reconnection Policy
//!
//! When a connection drops, or the first attempt fails:
//! 1. Wait `delay` (fixed, no backoff)
//! 2. Try again, up to `max_attempts` times
//! 3. Past the bound, stay `Disconnected(RetriesExhausted)` until the
//!    parameters change
//!
//! A server that rejects the handshake is not retried at all; only new
//! parameters (e.g. a fresh login) trigger another attempt.
//!
//! Whenever the parameters change the current handle is closed before the
//! next one is opened.

use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::InboundEvent;
use super::session::{Connection, Connector};
use crate::error::ChatError;
use crate::identity::ConnectionParams;

/// Default number of reconnection attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;

/// Default pause before each reconnection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Fixed-delay retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnection attempts after a drop or failed connect (0 = never retry)
    pub max_attempts: u32,
    /// Delay before each reconnection attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Why the session is not connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Lost or failed; a retry is scheduled
    Dropped,
    /// The retry budget is spent
    RetriesExhausted,
    /// The server refused the handshake
    Rejected(String),
    /// The parameters or server address can never produce a connection
    Misconfigured(String),
    /// The session was shut down
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection parameters yet
    Idle,
    /// Opening a handle; attempt 0 is the first try for these parameters
    Connecting { attempt: u32 },
    Connected,
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

enum Command {
    Send(String),
    Shutdown,
}

/// Inbound chat events in arrival order.
///
/// Handed out once, when the session starts.
pub struct InboundEvents {
    rx: mpsc::UnboundedReceiver<InboundEvent>,
}

impl InboundEvents {
    /// Wait for the next event. `None` after the session has shut down.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for InboundEvents {
    type Item = InboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Cloneable handle for sending and observing connection state.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Emit a chat message.
    ///
    /// While not connected this is a no-op that logs a warning. Messages
    /// are never queued for later delivery.
    pub fn send(&self, text: impl Into<String>) {
        if !self.is_connected() {
            warn!("Cannot send message, socket not connected");
            return;
        }
        if self.cmd_tx.send(Command::Send(text.into())).is_err() {
            warn!("Cannot send message, transport session has stopped");
        }
    }
}

/// Reconnect-capable realtime session.
///
/// Created via [`TransportSession::start`], which spawns the supervisor and
/// returns this owner plus the inbound event stream. Dropping it aborts the
/// supervisor; prefer [`TransportSession::shutdown`] to close the handle
/// cleanly.
pub struct TransportSession {
    handle: SessionHandle,
    task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl TransportSession {
    /// Start the supervisor.
    ///
    /// The session stays `Idle` until `params` holds a value and opens a
    /// fresh handle every time it changes.
    #[must_use = "the inbound event stream must be consumed"]
    pub fn start<C: Connector>(
        connector: C,
        params: watch::Receiver<Option<ConnectionParams>>,
        policy: ReconnectPolicy,
    ) -> (Self, InboundEvents) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let supervisor = Supervisor {
            connector,
            params_rx: params,
            params_open: true,
            cmd_rx,
            inbound_tx,
            state_tx,
            policy,
        };
        let task = tokio::spawn(supervisor.run());

        let session = Self {
            handle: SessionHandle { cmd_tx, state_rx },
            task: Some(task),
            shutdown_timeout: Duration::from_secs(1),
        };
        (session, InboundEvents { rx: inbound_rx })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.handle.watch_state()
    }

    pub fn send(&self, text: impl Into<String>) {
        self.handle.send(text)
    }

    /// Close the current handle and stop the supervisor.
    pub async fn shutdown(&mut self) {
        debug!("Transport session shutdown requested");
        let _ = self.handle.cmd_tx.send(Command::Shutdown);

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Supervisor terminated abnormally"),
                Err(_) => {
                    warn!("Supervisor did not stop in time, aborting");
                    task.abort();
                }
            }
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Transport session dropped, supervisor aborted");
        }
    }
}

/// What ended a phase of the supervisor.
enum Outcome {
    ParamsChanged,
    /// Not retrying; wait for new parameters
    Parked,
    Shutdown,
}

struct Supervisor<C: Connector> {
    connector: C,
    params_rx: watch::Receiver<Option<ConnectionParams>>,
    params_open: bool,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    state_tx: watch::Sender<ConnectionState>,
    policy: ReconnectPolicy,
}

impl<C: Connector> Supervisor<C> {
    async fn run(mut self) {
        debug!("Supervisor started");

        loop {
            let params = self.params_rx.borrow_and_update().clone();
            let outcome = match params {
                Some(params) => self.maintain(&params).await,
                None => {
                    self.set_state(ConnectionState::Idle);
                    Outcome::Parked
                }
            };

            match outcome {
                Outcome::ParamsChanged => continue,
                Outcome::Parked => {
                    let woke = next_interrupt(
                        &mut self.params_rx,
                        &mut self.cmd_rx,
                        &mut self.params_open,
                    )
                    .await;
                    if matches!(woke, Outcome::Shutdown) {
                        break;
                    }
                }
                Outcome::Shutdown => break,
            }
        }

        self.set_state(ConnectionState::Disconnected(DisconnectReason::Shutdown));
        debug!("Supervisor stopped");
    }

    /// Connect with `params` and keep the connection up until the budget
    /// runs out, the parameters change, or the session shuts down.
    async fn maintain(&mut self, params: &ConnectionParams) -> Outcome {
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.delay) => {}
                    outcome = next_interrupt(&mut self.params_rx, &mut self.cmd_rx, &mut self.params_open) => {
                        return outcome;
                    }
                }
            }

            self.set_state(ConnectionState::Connecting { attempt });
            let result = tokio::select! {
                result = self.connector.connect(params) => result,
                outcome = next_interrupt(&mut self.params_rx, &mut self.cmd_rx, &mut self.params_open) => {
                    return outcome;
                }
            };

            let mut conn = match result {
                Ok(conn) => conn,
                Err(e) if !e.is_retryable() => {
                    error!(error = %e, "Socket connection not possible, not retrying");
                    let reason = match e {
                        ChatError::Rejected(reason) => DisconnectReason::Rejected(reason),
                        other => DisconnectReason::Misconfigured(other.to_string()),
                    };
                    self.set_state(ConnectionState::Disconnected(reason));
                    return Outcome::Parked;
                }
                Err(e) => {
                    error!(error = %e, attempt, "Socket connection error");
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            attempts = attempt,
                            "Reconnection attempts exhausted, staying disconnected"
                        );
                        self.set_state(ConnectionState::Disconnected(
                            DisconnectReason::RetriesExhausted,
                        ));
                        return Outcome::Parked;
                    }
                    self.set_state(ConnectionState::Disconnected(DisconnectReason::Dropped));
                    attempt += 1;
                    continue;
                }
            };

            attempt = 0;
            self.set_state(ConnectionState::Connected);
            info!(origin = %params.origin_address(), "Socket connected");

            match self.pump(&mut conn).await {
                Some(outcome) => {
                    conn.close().await;
                    return outcome;
                }
                None => {
                    warn!("Socket disconnected, retrying");
                    self.set_state(ConnectionState::Disconnected(DisconnectReason::Dropped));
                    if self.policy.max_attempts == 0 {
                        self.set_state(ConnectionState::Disconnected(
                            DisconnectReason::RetriesExhausted,
                        ));
                        return Outcome::Parked;
                    }
                    attempt = 1;
                }
            }
        }
    }

    /// Shuttle events and commands while connected.
    ///
    /// Returns `None` when the connection drops, or the outcome that
    /// interrupted it.
    async fn pump(&mut self, conn: &mut C::Connection) -> Option<Outcome> {
        loop {
            tokio::select! {
                event = conn.recv() => match event {
                    Some(event) => {
                        debug!(success = event.success, "Received message");
                        if self.inbound_tx.send(event).is_err() {
                            debug!("Inbound consumer gone, event discarded");
                        }
                    }
                    None => return None,
                },
                changed = self.params_rx.changed(), if self.params_open => match changed {
                    Ok(()) => {
                        info!("Connection parameters changed, replacing connection");
                        return Some(Outcome::ParamsChanged);
                    }
                    Err(_) => self.params_open = false,
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = conn.send(&text).await {
                            warn!(error = %e, "Failed to emit message");
                        }
                    }
                    Some(Command::Shutdown) | None => return Some(Outcome::Shutdown),
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = ?current, to = ?state, "Connection state");
                *current = state;
                true
            }
        });
    }
}

/// Wait for something that ends the current phase while no connection is
/// usable. Sends arriving meanwhile are dropped with a warning.
async fn next_interrupt(
    params_rx: &mut watch::Receiver<Option<ConnectionParams>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    params_open: &mut bool,
) -> Outcome {
    loop {
        tokio::select! {
            changed = params_rx.changed(), if *params_open => match changed {
                Ok(()) => return Outcome::ParamsChanged,
                Err(_) => *params_open = false,
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(_)) => warn!("Cannot send message, socket not connected"),
                Some(Command::Shutdown) | None => return Outcome::Shutdown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_default() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay, Duration::from_secs(5));
    }

    #[test]
    fn test_only_connected_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Idle.is_connected());
        assert!(!ConnectionState::Connecting { attempt: 0 }.is_connected());
        assert!(!ConnectionState::Disconnected(DisconnectReason::Dropped).is_connected());
    }
}
