//! Transport abstraction for the Gridlock game protocol.
//!
//! The [`Transport`] trait is the server's view of one remote client: a
//! bidirectional text message channel. The protocol uses JSON text messages,
//! so every implementation must handle framing internally (WebSocket frames,
//! length-prefixed TCP, QUIC streams, …).
//!
//! # Connection Setup
//!
//! Accepting a connection is intentionally NOT part of this trait — listeners
//! have fundamentally different establishment parameters (TCP accept loops,
//! WebSocket upgrade handlers, in-process channels in tests). Build a
//! connected transport externally, then hand it to
//! [`SessionRegistry::serve`](crate::SessionRegistry::serve).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use gridlock_server::error::SessionError;
//! use gridlock_server::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SessionError> {
//!         // Deliver one JSON text message to the client
//!         unreachable!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         // Yield the next JSON text message from the client;
//!         // return None when the connection closed cleanly
//!         unreachable!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         // Shut the connection down
//!         unreachable!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;

/// A bidirectional text message channel to exactly one remote client.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON
/// message; each call to [`recv`](Transport::recv) yields one.
///
/// # Object Safety
///
/// The trait is object-safe, so `Box<dyn Transport>` works for dynamic
/// dispatch; the registry's connection driver takes `impl Transport`
/// (monomorphized) for the common case.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the connection driver
/// polls it inside `tokio::select!` together with session events and the
/// detach signal, and a cancelled `recv` must not lose a message.
/// Channel-backed implementations are naturally cancel-safe.
///
/// # Close discipline
///
/// Whoever owns a transport must close it exactly once, even when the
/// binding is concurrently superseded by a rejoin — the driver guarantees
/// this on every exit path.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the client.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] when the message could not be
    /// delivered (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), SessionError>;

    /// Receive the next JSON text message from the client.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message arrived
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the client closed the connection cleanly
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait docs](Transport)).
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the connection gracefully.
    ///
    /// Subsequent `send`/`recv` calls may error or yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the close handshake fails. Implementations
    /// should release resources even then.
    async fn close(&mut self) -> Result<(), SessionError>;
}
