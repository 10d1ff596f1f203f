//! # Reconnect Probe
//!
//! Exercises the session-reconnection contract end to end, over real
//! WebSockets, with both sides in one process:
//!
//! 1. Start a registry, a ticker and a TCP accept loop
//! 2. Create a game and join it — expect a single `GameJoined`
//! 3. Drop the connection (a simulated page reload)
//! 4. Reconnect and join again — expect `GameJoined` **then** `GameUpdate`
//!
//! ## Running
//!
//! ```sh
//! cargo run --example reconnect_probe
//! # RUST_LOG=debug for the registry's view of the rebind
//! ```

use std::sync::Arc;
use std::time::Duration;

use gridlock_server::protocol::{GameConfig, GameId, ServerMessage};
use gridlock_server::{ClientMessage, SessionRegistry, Transport, WebSocketTransport};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Server side ─────────────────────────────────────────────────
    let registry = Arc::new(SessionRegistry::new());
    tokio::spawn(Arc::clone(&registry).run_ticker());

    let player_id = Uuid::new_v4();
    let game_id = registry
        .create_game(
            player_id,
            "test_user",
            GameConfig::default()
                .with_heat_threshold(7)
                .with_duration_mins(30),
        )
        .await?;
    tracing::info!(%game_id, %player_id, "game created");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(accept_loop(listener, Arc::clone(&registry), game_id));

    let url = format!("ws://{addr}");

    // ── First connection ────────────────────────────────────────────
    let mut transport = WebSocketTransport::connect(&url).await?;
    send_join(&mut transport, player_id).await?;
    tracing::info!("sent JoinGame");

    match recv_message(&mut transport).await? {
        ServerMessage::GameJoined(payload) => {
            tracing::info!(
                rejoined = payload.rejoined,
                heat_threshold = payload.snapshot.config.heat_threshold,
                "first join acknowledged"
            );
        }
        other => bail(format!("expected GameJoined, got {other:?}"))?,
    }

    // Simulated reload: drop the socket without a goodbye.
    tracing::info!("dropping the connection");
    drop(transport);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // ── Second connection ───────────────────────────────────────────
    tracing::info!("reconnecting");
    let mut transport = WebSocketTransport::connect(&url).await?;
    send_join(&mut transport, player_id).await?;
    tracing::info!("sent JoinGame (rejoin)");

    // The rejoin contract: GameJoined first, GameUpdate immediately after,
    // both within the probe's two-second budget.
    let deadline = Duration::from_secs(2);
    let first = tokio::time::timeout(deadline, recv_message(&mut transport)).await??;
    let ServerMessage::GameJoined(payload) = first else {
        return bail(format!("expected GameJoined, got {first:?}"));
    };
    assert!(payload.rejoined, "second join must be acknowledged as rejoin");

    let second = tokio::time::timeout(deadline, recv_message(&mut transport)).await??;
    let ServerMessage::GameUpdate(snapshot) = second else {
        return bail(format!("expected GameUpdate, got {second:?}"));
    };

    tracing::info!(
        version = snapshot.version,
        status = ?snapshot.status,
        "rejoin resynchronized — GameJoined then GameUpdate, in order"
    );

    transport.close().await?;
    Ok(())
}

/// Accept connections and hand each to the registry's driver.
async fn accept_loop(
    listener: tokio::net::TcpListener,
    registry: Arc<SessionRegistry>,
    game_id: GameId,
) {
    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            return;
        };
        tracing::debug!(%peer, "connection accepted");
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            match WebSocketTransport::accept(stream).await {
                Ok(transport) => registry.serve(game_id, transport).await,
                Err(e) => tracing::warn!(error = %e, "WebSocket handshake failed"),
            }
        });
    }
}

async fn send_join(
    transport: &mut (impl Transport),
    player_id: Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    let join = ClientMessage::JoinGame {
        player_id,
        cf_handle: "test_user".into(),
    };
    transport.send(serde_json::to_string(&join)?).await?;
    Ok(())
}

async fn recv_message(
    transport: &mut (impl Transport),
) -> Result<ServerMessage, Box<dyn std::error::Error>> {
    match transport.recv().await {
        Some(Ok(text)) => Ok(serde_json::from_str(&text)?),
        Some(Err(e)) => Err(e.into()),
        None => Err("connection closed before a response arrived".into()),
    }
}

fn bail(message: String) -> Result<(), Box<dyn std::error::Error>> {
    Err(message.into())
}
