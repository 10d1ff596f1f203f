//! # Gridlock Server
//!
//! Transport-agnostic session registry and game core for the Gridlock
//! multiplayer battleship protocol.
//!
//! Gridlock is two-player battleship with a twist: every shot builds *heat*,
//! and at a configurable threshold the shooter's weapons lock until they get
//! a submission accepted on an external judge — or spend a timed *veto*.
//! This crate is the server side of that protocol as an embeddable library:
//! you accept connections however you like, the registry does the rest.
//!
//! ## Features
//!
//! - **Idempotent rejoin** — a second `JoinGame` for a known player never
//!   duplicates state; it detaches the old transport, binds the new one and
//!   resynchronizes with `GameJoined` followed by `GameUpdate`
//! - **Transport-agnostic** — implement the [`Transport`] trait for any
//!   backend; the default `transport-websocket` feature provides
//!   [`WebSocketTransport`]
//! - **Per-game locking** — sessions never contend with each other, and no
//!   lock is ever held across a transport send
//! - **Pluggable judge** — the `verifier-codeforces` feature verifies
//!   accepted submissions against the Codeforces API
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gridlock_server::{GameConfig, SessionRegistry, WebSocketTransport};
//!
//! let registry = Arc::new(SessionRegistry::new());
//! tokio::spawn(Arc::clone(&registry).run_ticker());
//!
//! let game_id = registry.create_game(host_id, "tourist", GameConfig::default()).await?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     let transport = WebSocketTransport::accept(stream).await?;
//!     let registry = Arc::clone(&registry);
//!     tokio::spawn(async move { registry.serve(game_id, transport).await });
//! }
//! ```

pub mod error;
pub mod error_codes;
pub mod game;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod transports;
pub mod verifier;

// Re-export primary types for ergonomic imports.
pub use error::SessionError;
pub use error_codes::ErrorCode;
pub use protocol::{ClientMessage, GameConfig, ServerMessage};
pub use registry::{ConnectionState, JoinOutcome, RegistryConfig, SessionRegistry};
pub use transport::Transport;
pub use verifier::{SubmissionVerifier, Unverified};

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
