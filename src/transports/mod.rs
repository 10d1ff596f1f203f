//! Transport implementations for the Gridlock game protocol.
//!
//! Concrete [`Transport`](crate::Transport) implementations live here behind
//! feature gates:
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example(registry: std::sync::Arc<gridlock_server::SessionRegistry>,
//! #                  game_id: gridlock_server::protocol::GameId)
//! #                  -> Result<(), gridlock_server::SessionError> {
//! use gridlock_server::WebSocketTransport;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     let transport = WebSocketTransport::accept(stream).await?;
//!     let registry = std::sync::Arc::clone(&registry);
//!     tokio::spawn(async move { registry.serve(game_id, transport).await });
//! }
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
