#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Shared test utilities for Gridlock server integration tests.
//!
//! Provides a channel-based [`MockTransport`] playing the role of one remote
//! client, plus helpers for building client message JSON and decoding what
//! the server sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use gridlock_server::protocol::{ClientMessage, PlayerId, ServerMessage, ShipPlacement};
use gridlock_server::{SessionError, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport: the test pushes client messages through
/// the [`MockHandle`], and everything the server sends is recorded.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Option<Result<String, SessionError>>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: bool,
}

/// Test-side handle to a [`MockTransport`].
pub struct MockHandle {
    incoming_tx: mpsc::UnboundedSender<Option<Result<String, SessionError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// A transport whose sends succeed.
    pub fn new() -> (Self, MockHandle) {
        Self::build(false)
    }

    /// A transport whose every `send` fails, for rollback tests.
    pub fn failing() -> (Self, MockHandle) {
        Self::build(true)
    }

    fn build(fail_sends: bool) -> (Self, MockHandle) {
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            fail_sends,
        };
        let handle = MockHandle {
            incoming_tx,
            sent,
            closed,
        };
        (transport, handle)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        if self.fail_sends {
            return Err(SessionError::TransportSend("wire cut".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            // Handle dropped: the client went away cleanly.
            None => None,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockHandle {
    /// Deliver one client message to the server.
    pub fn push(&self, text: String) {
        let _ = self.incoming_tx.send(Some(Ok(text)));
    }

    /// Deliver a clean connection close.
    pub fn push_close(&self) {
        let _ = self.incoming_tx.send(None);
    }

    /// Deliver a transport-level receive error.
    pub fn push_error(&self, reason: &str) {
        let _ = self
            .incoming_tx
            .send(Some(Err(SessionError::TransportReceive(reason.into()))));
    }

    /// Whether the server closed this transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// How many messages the server has sent so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Decode everything the server has sent so far.
    pub fn sent_messages(&self) -> Vec<ServerMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).expect("server sent invalid JSON"))
            .collect()
    }
}

// ── JSON helpers ────────────────────────────────────────────────────

/// JSON for a `JoinGame` client message.
pub fn join_json(player_id: PlayerId, cf_handle: &str) -> String {
    serde_json::to_string(&ClientMessage::JoinGame {
        player_id,
        cf_handle: cf_handle.into(),
    })
    .expect("join_json serialization")
}

/// JSON for a `PlaceShips` client message.
pub fn place_ships_json(ships: &[ShipPlacement]) -> String {
    serde_json::to_string(&ClientMessage::PlaceShips {
        ships: ships.to_vec(),
    })
    .expect("place_ships_json serialization")
}

/// JSON for a `Fire` client message.
pub fn fire_json(x: usize, y: usize) -> String {
    serde_json::to_string(&ClientMessage::Fire { x, y }).expect("fire_json serialization")
}

/// A standard 5/4/3/3/2 fleet laid out on the top five rows.
pub fn standard_fleet() -> Vec<ShipPlacement> {
    [5u8, 4, 3, 3, 2]
        .iter()
        .enumerate()
        .map(|(row, &size)| ShipPlacement {
            x: 0,
            y: row,
            size,
            vertical: false,
        })
        .collect()
}

/// Wait until `predicate` holds, or panic after ~2 seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, predicate: F) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
