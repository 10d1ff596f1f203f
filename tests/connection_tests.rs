#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! End-to-end tests of `SessionRegistry::serve`, the per-connection driver.
//!
//! Each test wires one or more `MockTransport`s into spawned drivers and
//! scripts the client side through the handles: join handshakes, transport
//! invalidation on rejoin, broadcast fan-out and the full
//! disconnect-then-rejoin scenario.

mod common;

use std::sync::Arc;
use std::time::Duration;

use gridlock_server::error_codes::ErrorCode;
use gridlock_server::protocol::{GameConfig, GameId, ServerMessage};
use gridlock_server::{ConnectionState, SessionRegistry};
use uuid::Uuid;

use common::{
    fire_json, join_json, place_ships_json, standard_fleet, wait_until, MockHandle, MockTransport,
};

fn player(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// Spawn a driver for a fresh mock connection.
fn spawn_driver(registry: &Arc<SessionRegistry>, game_id: GameId) -> MockHandle {
    let (transport, handle) = MockTransport::new();
    let registry = Arc::clone(registry);
    tokio::spawn(async move { registry.serve(game_id, transport).await });
    handle
}

async fn host_game(registry: &Arc<SessionRegistry>) -> (GameId, Uuid) {
    let host = player(1);
    let game_id = registry
        .create_game(host, "host_handle", GameConfig::default())
        .await
        .unwrap();
    (game_id, host)
}

// ════════════════════════════════════════════════════════════════════
// Handshake
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn driver_answers_first_join_with_game_joined() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;

    let conn = spawn_driver(&registry, game_id);
    conn.push(join_json(host, "host_handle"));

    wait_until("GameJoined", || conn.sent_count() >= 1).await;
    let messages = conn.sent_messages();
    assert!(matches!(messages[0], ServerMessage::GameJoined(_)));
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn unknown_game_is_rejected_with_an_error_and_a_close() {
    let registry = Arc::new(SessionRegistry::new());
    let conn = spawn_driver(&registry, Uuid::new_v4());
    conn.push(join_json(player(1), "nobody"));

    wait_until("connection closed", || conn.is_closed()).await;
    let messages = conn.sent_messages();
    assert_eq!(messages.len(), 1, "only the rejection may be sent");
    match &messages[0] {
        ServerMessage::Error { error_code, .. } => {
            assert_eq!(*error_code, Some(ErrorCode::GameNotFound));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn messages_before_join_are_rejected_but_not_fatal() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;

    let conn = spawn_driver(&registry, game_id);
    conn.push(fire_json(0, 0));

    wait_until("rejection", || conn.sent_count() >= 1).await;
    match &conn.sent_messages()[0] {
        ServerMessage::Error { error_code, .. } => {
            assert_eq!(*error_code, Some(ErrorCode::NotInGame));
        }
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(!conn.is_closed(), "the client may still join afterwards");

    conn.push(join_json(host, "host_handle"));
    wait_until("GameJoined after rejection", || conn.sent_count() >= 2).await;
    assert!(matches!(
        conn.sent_messages()[1],
        ServerMessage::GameJoined(_)
    ));
}

#[tokio::test]
async fn driver_marks_player_disconnected_on_client_close() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;

    let conn = spawn_driver(&registry, game_id);
    conn.push(join_json(host, "host_handle"));
    wait_until("joined", || conn.sent_count() >= 1).await;

    conn.push_close();
    wait_until("disconnected", || conn.is_closed()).await;

    assert_eq!(
        registry.connection_state(game_id, host).await.unwrap(),
        ConnectionState::Disconnected
    );
    assert_eq!(
        registry.connection_count(game_id).await.unwrap(),
        1,
        "the player connection survives its transport"
    );
}

#[tokio::test]
async fn transport_error_closes_and_disconnects() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;

    let conn = spawn_driver(&registry, game_id);
    conn.push(join_json(host, "host_handle"));
    wait_until("joined", || conn.sent_count() >= 1).await;

    conn.push_error("connection reset");
    wait_until("closed after error", || conn.is_closed()).await;
    assert_eq!(
        registry.connection_state(game_id, host).await.unwrap(),
        ConnectionState::Disconnected
    );
}

// ════════════════════════════════════════════════════════════════════
// Rejoin and transport invalidation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn rejoin_closes_the_superseded_transport() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;

    let first = spawn_driver(&registry, game_id);
    first.push(join_json(host, "host_handle"));
    wait_until("first join", || first.sent_count() >= 1).await;

    let second = spawn_driver(&registry, game_id);
    second.push(join_json(host, "host_handle"));
    wait_until("rejoin responses", || second.sent_count() >= 2).await;
    wait_until("old transport closed", || first.is_closed()).await;

    let messages = second.sent_messages();
    assert!(matches!(messages[0], ServerMessage::GameJoined(_)));
    assert!(matches!(messages[1], ServerMessage::GameUpdate(_)));

    // Nothing may be delivered through the old transport anymore: a guest
    // joining triggers a PlayerJoined broadcast that only the live
    // connection receives.
    let stale_count = first.sent_count();
    let guest = spawn_driver(&registry, game_id);
    guest.push(join_json(player(2), "guest_handle"));
    wait_until("PlayerJoined on the live connection", || {
        second
            .sent_messages()
            .iter()
            .any(|m| matches!(m, ServerMessage::PlayerJoined { .. }))
    })
    .await;
    assert_eq!(
        first.sent_count(),
        stale_count,
        "the invalidated transport must not receive broadcasts"
    );
}

#[tokio::test]
async fn rejoin_over_the_same_connection_rebinds_in_place() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;

    let conn = spawn_driver(&registry, game_id);
    conn.push(join_json(host, "host_handle"));
    wait_until("first join", || conn.sent_count() >= 1).await;

    conn.push(join_json(host, "host_handle"));
    wait_until("rejoin responses", || conn.sent_count() >= 3).await;

    let messages = conn.sent_messages();
    match &messages[1] {
        ServerMessage::GameJoined(payload) => assert!(payload.rejoined),
        other => panic!("expected GameJoined, got {other:?}"),
    }
    assert!(matches!(messages[2], ServerMessage::GameUpdate(_)));
    assert!(!conn.is_closed(), "an in-place rebind keeps the connection");
    assert_eq!(
        registry.connection_state(game_id, host).await.unwrap(),
        ConnectionState::Connected
    );
}

// ════════════════════════════════════════════════════════════════════
// The probe scenario: join, disconnect, rejoin
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn disconnect_then_rejoin_resynchronizes_within_deadline() {
    let registry = Arc::new(SessionRegistry::new());
    let host = player(1);
    let config = GameConfig::default()
        .with_heat_threshold(7)
        .with_duration_mins(30);
    let game_id = registry
        .create_game(host, "test_user", config)
        .await
        .unwrap();

    // First connection: one GameJoined carrying the configured threshold.
    let first = spawn_driver(&registry, game_id);
    first.push(join_json(host, "test_user"));
    wait_until("first GameJoined", || first.sent_count() >= 1).await;
    match &first.sent_messages()[0] {
        ServerMessage::GameJoined(payload) => {
            assert!(!payload.rejoined);
            assert_eq!(payload.snapshot.config.heat_threshold, 7);
        }
        other => panic!("expected GameJoined, got {other:?}"),
    }

    // Simulated reload: drop the connection.
    first.push_close();
    wait_until("disconnect", || first.is_closed()).await;

    // Second connection: GameJoined then GameUpdate, both describing the
    // same game, within the probe's two-second budget.
    let second = spawn_driver(&registry, game_id);
    second.push(join_json(host, "test_user"));
    tokio::time::timeout(Duration::from_secs(2), async {
        wait_until("rejoin responses", || second.sent_count() >= 2).await;
    })
    .await
    .expect("rejoin responses must arrive within two seconds");

    let messages = second.sent_messages();
    match (&messages[0], &messages[1]) {
        (ServerMessage::GameJoined(payload), ServerMessage::GameUpdate(snapshot)) => {
            assert!(payload.rejoined);
            assert_eq!(payload.game_id, game_id);
            assert_eq!(snapshot.config.heat_threshold, 7);
            assert_eq!(payload.snapshot, **snapshot);
        }
        other => panic!("expected GameJoined then GameUpdate, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// Broadcast fan-out
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn guest_join_is_announced_to_the_host() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;

    let host_conn = spawn_driver(&registry, game_id);
    host_conn.push(join_json(host, "host_handle"));
    wait_until("host joined", || host_conn.sent_count() >= 1).await;

    let guest = player(2);
    let guest_conn = spawn_driver(&registry, game_id);
    guest_conn.push(join_json(guest, "guest_handle"));

    wait_until("PlayerJoined reaches the host", || {
        host_conn.sent_messages().iter().any(|m| {
            matches!(m, ServerMessage::PlayerJoined { player_id, .. } if *player_id == guest)
        })
    })
    .await;
}

#[tokio::test]
async fn combat_flow_reaches_both_players() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;
    let guest = player(2);

    let host_conn = spawn_driver(&registry, game_id);
    host_conn.push(join_json(host, "host_handle"));
    let guest_conn = spawn_driver(&registry, game_id);
    guest_conn.push(join_json(guest, "guest_handle"));
    wait_until("both joined", || {
        host_conn.sent_count() >= 1 && guest_conn.sent_count() >= 1
    })
    .await;

    host_conn.push(place_ships_json(&standard_fleet()));
    guest_conn.push(place_ships_json(&standard_fleet()));

    let saw_game_start = |handle: &MockHandle| {
        handle
            .sent_messages()
            .iter()
            .any(|m| matches!(m, ServerMessage::GameStart))
    };
    wait_until("GameStart on both connections", || {
        saw_game_start(&host_conn) && saw_game_start(&guest_conn)
    })
    .await;

    host_conn.push(fire_json(9, 9));
    let saw_shot = |handle: &MockHandle| {
        handle.sent_messages().iter().any(|m| {
            matches!(m, ServerMessage::ShotResult { shooter_id, hit, .. }
                if *shooter_id == host && !hit)
        })
    };
    wait_until("ShotResult on both connections", || {
        saw_shot(&host_conn) && saw_shot(&guest_conn)
    })
    .await;
}

// ════════════════════════════════════════════════════════════════════
// Ticker
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ticker_pushes_personalized_updates() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = host_game(&registry).await;
    let ticker = tokio::spawn(Arc::clone(&registry).run_ticker());

    let conn = spawn_driver(&registry, game_id);
    conn.push(join_json(host, "host_handle"));

    tokio::time::timeout(Duration::from_secs(3), async {
        wait_until("tick GameUpdate", || {
            conn.sent_messages().iter().any(|m| {
                matches!(m, ServerMessage::GameUpdate(snapshot)
                    if snapshot.you.player_id == host)
            })
        })
        .await;
    })
    .await
    .expect("the 1 Hz ticker must produce a GameUpdate");

    ticker.abort();
}
