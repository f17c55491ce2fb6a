//! Scripted in-memory connector shared by the integration tests.
//!
//! Every connection the supervisor opens shows up as a [`FakeRemote`] on the
//! receiver returned by [`FakeConnector::new`]. The remote plays the server:
//! it pushes events, reads what the client sent, and can drop the link.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use chat_realtime::realtime::{Connection, ConnectionState, Connector, InboundEvent};
use chat_realtime::{ChatError, ConnectionParams};

/// How the next connect attempts behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Accept,
    /// Network-level failure, retried by the policy
    Refuse,
    /// Handshake refused by the server
    Reject(String),
    /// The target address can never be connected to
    Misconfigure(String),
}

struct Inner {
    mode: Mutex<Mode>,
    attempts: Mutex<Vec<(ConnectionParams, Instant)>>,
    log: Arc<Mutex<Vec<String>>>,
    opened: Mutex<usize>,
    remotes: mpsc::UnboundedSender<FakeRemote>,
}

#[derive(Clone)]
pub struct FakeConnector {
    inner: Arc<Inner>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Inner {
                mode: Mutex::new(Mode::Accept),
                attempts: Mutex::new(Vec::new()),
                log: Arc::new(Mutex::new(Vec::new())),
                opened: Mutex::new(0),
                remotes,
            }),
        };
        (connector, rx)
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.inner.mode.lock().unwrap() = mode;
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.attempts.lock().unwrap().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.inner
            .attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn attempt_params(&self) -> Vec<ConnectionParams> {
        self.inner
            .attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(params, _)| params.clone())
            .collect()
    }

    /// Lifecycle of every connection, e.g. `["open 0", "close 0", "open 1"]`.
    pub fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, params: &ConnectionParams) -> Result<FakeConnection, ChatError> {
        self.inner
            .attempts
            .lock()
            .unwrap()
            .push((params.clone(), Instant::now()));

        let mode = self.inner.mode.lock().unwrap().clone();
        match mode {
            Mode::Refuse => return Err(ChatError::Connection("connection refused".into())),
            Mode::Reject(reason) => return Err(ChatError::Rejected(reason)),
            Mode::Misconfigure(reason) => return Err(ChatError::Config(reason)),
            Mode::Accept => {}
        }

        let index = {
            let mut opened = self.inner.opened.lock().unwrap();
            let index = *opened;
            *opened += 1;
            index
        };
        self.inner.log.lock().unwrap().push(format!("open {}", index));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let remote = FakeRemote {
            index,
            params: params.clone(),
            events: Some(events_tx),
            sent: sent_rx,
            closed: closed.clone(),
        };
        let _ = self.inner.remotes.send(remote);

        Ok(FakeConnection {
            index,
            events: events_rx,
            sent: sent_tx,
            closed,
            log: self.inner.log.clone(),
        })
    }
}

pub struct FakeConnection {
    index: usize,
    events: mpsc::UnboundedReceiver<InboundEvent>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&mut self, text: &str) -> Result<(), ChatError> {
        self.sent
            .send(text.to_string())
            .map_err(|_| ChatError::Connection("remote gone".into()))
    }

    async fn recv(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("close {}", self.index));
    }
}

/// Server side of one fake connection.
pub struct FakeRemote {
    pub index: usize,
    pub params: ConnectionParams,
    events: Option<mpsc::UnboundedSender<InboundEvent>>,
    sent: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl FakeRemote {
    /// Deliver an event. False once the client side is gone.
    pub fn push(&self, event: InboundEvent) -> bool {
        match &self.events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate a network drop.
    pub fn drop_connection(&mut self) {
        self.events = None;
    }

    pub async fn next_sent(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Wait until the connection state satisfies `pred`, failing after a
/// generous (virtual) timeout.
pub async fn wait_for_state(
    state: &mut watch::Receiver<ConnectionState>,
    pred: impl FnMut(&ConnectionState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(600), state.wait_for(pred))
        .await
        .expect("state not reached in time")
        .map(|_| ())
        .expect("session stopped");
}

pub async fn next_remote(remotes: &mut mpsc::UnboundedReceiver<FakeRemote>) -> FakeRemote {
    tokio::time::timeout(Duration::from_secs(600), remotes.recv())
        .await
        .expect("no connection opened in time")
        .expect("connector dropped")
}

/// Poll until the connector has seen at least `n` connect attempts.
pub async fn wait_for_attempts(connector: &FakeConnector, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(600);
    while connector.attempt_count() < n {
        assert!(Instant::now() < deadline, "only {} attempts", connector.attempt_count());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
