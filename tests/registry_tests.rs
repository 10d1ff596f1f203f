#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Join and rejoin semantics of `SessionRegistry::handle_join`.
//!
//! Covers the session-reconnection contract: one player connection per
//! identifier no matter how often they join, `GameJoined` before
//! `GameUpdate` on rejoin, transport invalidation, rollback on undeliverable
//! responses, and rejection taxonomy.

mod common;

use std::sync::Arc;

use gridlock_server::protocol::{GameConfig, GameStatus, ServerMessage};
use gridlock_server::{ConnectionState, SessionError, SessionRegistry};
use uuid::Uuid;

use common::{standard_fleet, MockTransport};

fn player(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

async fn new_game(registry: &SessionRegistry) -> (gridlock_server::protocol::GameId, Uuid) {
    let host = player(1);
    let game_id = registry
        .create_game(host, "host_handle", GameConfig::default())
        .await
        .unwrap();
    (game_id, host)
}

// ════════════════════════════════════════════════════════════════════
// First join
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn first_join_sends_exactly_one_game_joined() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut transport, handle) = MockTransport::new();
    let outcome = registry
        .handle_join(game_id, host, "host_handle", &mut transport)
        .await
        .unwrap();

    assert!(!outcome.rejoined);
    let messages = handle.sent_messages();
    assert_eq!(messages.len(), 1, "first join yields exactly one message");
    match &messages[0] {
        ServerMessage::GameJoined(payload) => {
            assert_eq!(payload.game_id, game_id);
            assert_eq!(payload.player_id, host);
            assert_eq!(payload.cf_handle, "host_handle");
            assert!(!payload.rejoined);
            assert_eq!(payload.snapshot.config.heat_threshold, 7);
        }
        other => panic!("expected GameJoined, got {other:?}"),
    }

    assert_eq!(registry.connection_count(game_id).await.unwrap(), 1);
    assert_eq!(
        registry.connection_state(game_id, host).await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn snapshot_carries_configured_heat_threshold() {
    let registry = SessionRegistry::new();
    let host = player(1);
    let config = GameConfig::default().with_heat_threshold(7);
    let game_id = registry.create_game(host, "p1", config).await.unwrap();

    let (mut transport, handle) = MockTransport::new();
    registry
        .handle_join(game_id, host, "p1", &mut transport)
        .await
        .unwrap();

    match &handle.sent_messages()[0] {
        ServerMessage::GameJoined(payload) => {
            assert_eq!(payload.snapshot.config.heat_threshold, 7);
            assert_eq!(payload.snapshot.you.heat, 0);
            assert!(!payload.snapshot.you.weapons_locked);
        }
        other => panic!("expected GameJoined, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// Rejoin
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn rejoin_keeps_exactly_one_connection() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut first, _first_handle) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut first)
        .await
        .unwrap();

    let (mut second, _second_handle) = MockTransport::new();
    let outcome = registry
        .handle_join(game_id, host, "host_handle", &mut second)
        .await
        .unwrap();

    assert!(outcome.rejoined);
    assert_eq!(
        registry.connection_count(game_id).await.unwrap(),
        1,
        "rejoin must not duplicate the player connection"
    );
}

#[tokio::test]
async fn rejoin_sends_game_joined_then_game_update() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut first, _) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut first)
        .await
        .unwrap();

    let (mut second, second_handle) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut second)
        .await
        .unwrap();

    let messages = second_handle.sent_messages();
    assert_eq!(messages.len(), 2, "rejoin yields exactly two messages");
    match (&messages[0], &messages[1]) {
        (ServerMessage::GameJoined(payload), ServerMessage::GameUpdate(snapshot)) => {
            assert!(payload.rejoined);
            // Acknowledgement and state sync describe the same state.
            assert_eq!(payload.snapshot, **snapshot);
        }
        other => panic!("expected GameJoined then GameUpdate, got {other:?}"),
    }
}

#[tokio::test]
async fn rejoin_detaches_previous_binding() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut first, _) = MockTransport::new();
    let mut first_outcome = registry
        .handle_join(game_id, host, "host_handle", &mut first)
        .await
        .unwrap();
    assert!(!first_outcome.detached());

    let (mut second, _) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut second)
        .await
        .unwrap();

    assert!(
        first_outcome.detached(),
        "the superseded binding must receive the detach signal"
    );
}

#[tokio::test]
async fn rejoin_works_while_disconnected() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut first, _) = MockTransport::new();
    let outcome = registry
        .handle_join(game_id, host, "host_handle", &mut first)
        .await
        .unwrap();

    // The driver lost its transport.
    registry
        .mark_disconnected(game_id, host, outcome.generation())
        .await;
    assert_eq!(
        registry.connection_state(game_id, host).await.unwrap(),
        ConnectionState::Disconnected
    );

    let (mut second, second_handle) = MockTransport::new();
    let outcome = registry
        .handle_join(game_id, host, "host_handle", &mut second)
        .await
        .unwrap();
    assert!(outcome.rejoined);
    assert_eq!(second_handle.sent_count(), 2);
    assert_eq!(
        registry.connection_state(game_id, host).await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn last_synced_version_tracks_join_snapshots() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut first, _) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut first)
        .await
        .unwrap();
    let v1 = registry.last_synced_version(game_id, host).await.unwrap();

    // A guest joining mutates the game, bumping the version.
    let guest = player(2);
    let (mut guest_transport, _) = MockTransport::new();
    registry
        .handle_join(game_id, guest, "guest_handle", &mut guest_transport)
        .await
        .unwrap();

    let (mut second, _) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut second)
        .await
        .unwrap();
    let v2 = registry.last_synced_version(game_id, host).await.unwrap();
    assert!(v2 > v1, "rejoin must record the newer snapshot version");
}

// ════════════════════════════════════════════════════════════════════
// Rejection taxonomy
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unknown_game_is_rejected_before_any_message() {
    let registry = SessionRegistry::new();
    let bogus = Uuid::new_v4();

    let (mut transport, handle) = MockTransport::new();
    let err = registry
        .handle_join(bogus, player(1), "someone", &mut transport)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::UnknownGame(_)));
    assert_eq!(
        handle.sent_count(),
        0,
        "no join response may precede the rejection"
    );
}

#[tokio::test]
async fn invalid_join_is_rejected_without_mutation() {
    let registry = SessionRegistry::new();
    let (game_id, _) = new_game(&registry).await;

    let (mut transport, handle) = MockTransport::new();
    let err = registry
        .handle_join(game_id, Uuid::nil(), "someone", &mut transport)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidJoin(_)));

    let err = registry
        .handle_join(game_id, player(9), "   ", &mut transport)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidJoin(_)));

    assert_eq!(handle.sent_count(), 0);
    assert_eq!(registry.connection_count(game_id).await.unwrap(), 0);
}

#[tokio::test]
async fn third_player_is_rejected_with_game_full() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut t1, _) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut t1)
        .await
        .unwrap();
    let (mut t2, _) = MockTransport::new();
    registry
        .handle_join(game_id, player(2), "guest", &mut t2)
        .await
        .unwrap();

    let (mut t3, handle) = MockTransport::new();
    let err = registry
        .handle_join(game_id, player(3), "stranger", &mut t3)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::GameFull));
    assert_eq!(handle.sent_count(), 0);
    assert_eq!(registry.connection_count(game_id).await.unwrap(), 2);
}

// ════════════════════════════════════════════════════════════════════
// Rollback
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn failed_first_join_leaves_no_connection_behind() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut broken, _) = MockTransport::failing();
    let err = registry
        .handle_join(game_id, host, "host_handle", &mut broken)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TransportSend(_)));

    assert_eq!(
        registry.connection_count(game_id).await.unwrap(),
        0,
        "a first join whose responses never arrived must roll back"
    );

    // And the player can join again as if nothing happened.
    let (mut transport, handle) = MockTransport::new();
    let outcome = registry
        .handle_join(game_id, host, "host_handle", &mut transport)
        .await
        .unwrap();
    assert!(!outcome.rejoined);
    assert_eq!(handle.sent_count(), 1);
}

#[tokio::test]
async fn failed_rejoin_leaves_player_disconnected_but_registered() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut first, _) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut first)
        .await
        .unwrap();

    let (mut broken, _) = MockTransport::failing();
    let err = registry
        .handle_join(game_id, host, "host_handle", &mut broken)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TransportSend(_)));

    assert_eq!(registry.connection_count(game_id).await.unwrap(), 1);
    assert_eq!(
        registry.connection_state(game_id, host).await.unwrap(),
        ConnectionState::Disconnected,
        "a failed rejoin leaves the connection eligible for another rejoin"
    );

    let (mut again, _) = MockTransport::new();
    let outcome = registry
        .handle_join(game_id, host, "host_handle", &mut again)
        .await
        .unwrap();
    assert!(outcome.rejoined);
}

// ════════════════════════════════════════════════════════════════════
// Concurrency
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn concurrent_joins_for_one_player_converge_on_one_connection() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, host) = new_game(&registry).await;

    let (mut t1, _) = MockTransport::new();
    let (mut t2, _) = MockTransport::new();

    let r1 = Arc::clone(&registry);
    let r2 = Arc::clone(&registry);
    let (a, b) = tokio::join!(
        async move { r1.handle_join(game_id, host, "host_handle", &mut t1).await },
        async move { r2.handle_join(game_id, host, "host_handle", &mut t2).await },
    );
    assert!(a.is_ok());
    assert!(b.is_ok());

    assert_eq!(
        registry.connection_count(game_id).await.unwrap(),
        1,
        "racing joins must never create two player connections"
    );
    assert_eq!(
        registry.connection_state(game_id, host).await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn concurrent_guest_joins_fill_exactly_one_seat() {
    let registry = Arc::new(SessionRegistry::new());
    let (game_id, _) = new_game(&registry).await;

    let guest_a = player(10);
    let guest_b = player(11);
    let (mut t1, _) = MockTransport::new();
    let (mut t2, _) = MockTransport::new();

    let r1 = Arc::clone(&registry);
    let r2 = Arc::clone(&registry);
    let (a, b) = tokio::join!(
        async move { r1.handle_join(game_id, guest_a, "guest_a", &mut t1).await },
        async move { r2.handle_join(game_id, guest_b, "guest_b", &mut t2).await },
    );

    // Exactly one of the two racing strangers wins the seat.
    match (a.is_ok(), b.is_ok()) {
        (true, false) | (false, true) => {}
        (won_a, won_b) => panic!("expected exactly one winner, got ({won_a}, {won_b})"),
    }
    assert_eq!(registry.connection_count(game_id).await.unwrap(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Game operations through the registry
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn full_match_reaches_game_over_and_blocks_new_joins() {
    let registry = SessionRegistry::new();
    let host = player(1);
    let guest = player(2);
    // High threshold so the winning streak never locks.
    let config = GameConfig::default().with_heat_threshold(100);
    let game_id = registry.create_game(host, "host", config).await.unwrap();

    let (mut t1, _) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host", &mut t1)
        .await
        .unwrap();
    let (mut t2, _) = MockTransport::new();
    registry
        .handle_join(game_id, guest, "guest", &mut t2)
        .await
        .unwrap();

    registry
        .place_ships(game_id, host, &standard_fleet())
        .await
        .unwrap();
    registry
        .place_ships(game_id, guest, &standard_fleet())
        .await
        .unwrap();

    let snapshot = registry.game_snapshot(game_id, host).await.unwrap();
    assert_eq!(snapshot.status, GameStatus::Playing);

    // Host sinks the whole fleet: rows 0..5, sizes 5/4/3/3/2.
    for (row, &size) in [5u8, 4, 3, 3, 2].iter().enumerate() {
        for x in 0..size as usize {
            registry.fire(game_id, host, x, row).await.unwrap();
        }
    }

    let snapshot = registry.game_snapshot(game_id, host).await.unwrap();
    assert_eq!(snapshot.status, GameStatus::Finished);

    // New registrations are refused, rejoins still resynchronize.
    let (mut t3, _) = MockTransport::new();
    let err = registry
        .handle_join(game_id, player(3), "stranger", &mut t3)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::GameEnded));

    let (mut t4, handle) = MockTransport::new();
    let outcome = registry
        .handle_join(game_id, host, "host", &mut t4)
        .await
        .unwrap();
    assert!(outcome.rejoined);
    assert_eq!(handle.sent_count(), 2);
}

#[tokio::test]
async fn firing_before_placement_is_rejected() {
    let registry = SessionRegistry::new();
    let (game_id, host) = new_game(&registry).await;

    let (mut t1, _) = MockTransport::new();
    registry
        .handle_join(game_id, host, "host_handle", &mut t1)
        .await
        .unwrap();

    let err = registry.fire(game_id, host, 0, 0).await.unwrap_err();
    assert!(matches!(err, SessionError::GameNotStarted));
}
