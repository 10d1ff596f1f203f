//! Session registry: games, player connections and the rejoin contract.
//!
//! [`SessionRegistry`] tracks every live game and resolves incoming joins
//! deterministically:
//!
//! - a `JoinGame` for an unseen player identifier creates a player
//!   connection, binds the transport and answers with a single `GameJoined`;
//! - a `JoinGame` for a player the game already knows is a **rejoin**: the
//!   prior transport is detached (its driver closes it), the new transport
//!   is bound, and the client receives `GameJoined` followed by a
//!   `GameUpdate` carrying the authoritative snapshot, in that order.
//!
//! Joining twice never creates two player connections and never corrupts
//! game state; it only rebinds the transport and resynchronizes.
//!
//! Locking is per game session (a `tokio::sync::Mutex` each); the registry
//! map itself sits behind a `RwLock` that is only held for lookups and
//! inserts. Snapshots are taken under the session lock, transport sends
//! always happen after it is released, so a slow client can never stall the
//! game it is part of.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::game::{GameState, ShotOutcome, TickOutcome};
use crate::protocol::{
    ClientMessage, GameConfig, GameId, GameJoinedPayload, GameSnapshot, GameStatus, PlayerId,
    ServerMessage, ShipPlacement, UnlockReason,
};
use crate::transport::Transport;
use crate::verifier::{SubmissionVerifier, Unverified};

/// Default capacity of each game's bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default cooldown between submission verification attempts per player.
const DEFAULT_VERIFICATION_COOLDOWN: Duration = Duration::from_secs(10);

/// Default retention of finished games before the ticker prunes them.
const DEFAULT_FINISHED_RETENTION: Duration = Duration::from_secs(300);

/// Cadence of the registry ticker.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Tuning knobs for a [`SessionRegistry`].
///
/// # Example
///
/// ```
/// use gridlock_server::registry::RegistryConfig;
/// use std::time::Duration;
///
/// let config = RegistryConfig::new()
///     .with_event_channel_capacity(512)
///     .with_verification_cooldown(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each game's broadcast event channel. Drivers that fall
    /// behind skip events and resynchronize from the next tick snapshot.
    /// Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Minimum time between submission verification attempts per player.
    pub verification_cooldown: Duration,
    /// How long finished games are kept before the ticker prunes them.
    pub finished_retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            verification_cooldown: DEFAULT_VERIFICATION_COOLDOWN,
            finished_retention: DEFAULT_FINISHED_RETENTION,
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-game event channel capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the cooldown between verification attempts.
    #[must_use]
    pub fn with_verification_cooldown(mut self, cooldown: Duration) -> Self {
        self.verification_cooldown = cooldown;
        self
    }

    /// Set how long finished games are retained.
    #[must_use]
    pub fn with_finished_retention(mut self, retention: Duration) -> Self {
        self.finished_retention = retention;
        self
    }
}

// ── Connections ─────────────────────────────────────────────────────

/// Connection state of one player within a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A live transport is bound.
    Connected,
    /// No transport; the player may rejoin at any time.
    Disconnected,
}

/// The live-transport binding of a player connection. Holds the detach
/// signal to the driver that owns the transport; at most one exists per
/// player at any instant.
struct TransportBinding {
    generation: u64,
    detach: oneshot::Sender<()>,
}

/// One player's participation state within a game. Created by the first
/// `JoinGame` for that player, rebound (never recreated) by every later one,
/// and destroyed only together with the game session.
struct PlayerConnection {
    cf_handle: String,
    binding: Option<TransportBinding>,
    last_snapshot_version: u64,
}

/// Events fanned out to every connection driver of a game.
#[derive(Debug, Clone)]
enum SessionEvent {
    /// Deliver this message to every connected player.
    Broadcast(ServerMessage),
    /// Each driver builds and sends a personalized `GameUpdate`.
    Tick,
}

/// One game plus its player connections, guarded by a single async mutex.
struct GameSession {
    game: GameState,
    connections: HashMap<PlayerId, PlayerConnection>,
    events: broadcast::Sender<SessionEvent>,
    next_generation: u64,
}

impl GameSession {
    fn broadcast(&self, message: ServerMessage) {
        // No receivers is fine: nobody is connected right now.
        let _ = self.events.send(SessionEvent::Broadcast(message));
    }

    /// Bind a (possibly new) player connection to the calling driver.
    /// Any prior binding is detached fire-and-forget: its driver closes the
    /// superseded transport on its own, and a failure to deliver the signal
    /// means that driver is already gone.
    fn bind(
        &mut self,
        player_id: PlayerId,
        cf_handle: &str,
    ) -> (u64, oneshot::Receiver<()>, broadcast::Receiver<SessionEvent>) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let (detach_tx, detach_rx) = oneshot::channel();

        let connection = self
            .connections
            .entry(player_id)
            .or_insert_with(|| PlayerConnection {
                cf_handle: cf_handle.to_string(),
                binding: None,
                last_snapshot_version: 0,
            });
        if let Some(previous) = connection.binding.take() {
            let _ = previous.detach.send(());
        }
        connection.binding = Some(TransportBinding {
            generation,
            detach: detach_tx,
        });

        (generation, detach_rx, self.events.subscribe())
    }

    fn binding_generation(&self, player_id: PlayerId) -> Option<u64> {
        self.connections
            .get(&player_id)?
            .binding
            .as_ref()
            .map(|b| b.generation)
    }
}

// ── Join outcome ────────────────────────────────────────────────────

/// Result of a successful [`SessionRegistry::handle_join`]: the caller's
/// transport is now the single live binding for the player.
pub struct JoinOutcome {
    /// The game that was joined.
    pub game_id: GameId,
    /// The player identifier the transport is bound to.
    pub player_id: PlayerId,
    /// `true` when an existing player connection was rebound.
    pub rejoined: bool,
    generation: u64,
    detach: oneshot::Receiver<()>,
    events: broadcast::Receiver<SessionEvent>,
}

impl JoinOutcome {
    /// The binding generation, for
    /// [`mark_disconnected`](SessionRegistry::mark_disconnected) when
    /// driving a transport by hand instead of through
    /// [`serve`](SessionRegistry::serve).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `true` once a later join has superseded this binding.
    pub fn detached(&mut self) -> bool {
        match self.detach.try_recv() {
            Ok(()) => true,
            Err(oneshot::error::TryRecvError::Closed) => true,
            Err(oneshot::error::TryRecvError::Empty) => false,
        }
    }
}

impl std::fmt::Debug for JoinOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinOutcome")
            .field("game_id", &self.game_id)
            .field("player_id", &self.player_id)
            .field("rejoined", &self.rejoined)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Bookkeeping result of the locked phase of a join, before anything is
/// sent on the transport.
struct PreparedJoin {
    rejoined: bool,
    cf_handle: String,
    generation: u64,
    detach: oneshot::Receiver<()>,
    events: broadcast::Receiver<SessionEvent>,
    snapshot: GameSnapshot,
}

// ── Registry ────────────────────────────────────────────────────────

/// Tracks active player sessions per game and resolves rejoin requests
/// deterministically. See the [module docs](self) for the contract.
pub struct SessionRegistry {
    games: RwLock<HashMap<GameId, Arc<Mutex<GameSession>>>>,
    verifier: Arc<dyn SubmissionVerifier>,
    config: RegistryConfig,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create a registry that accepts every handle and submission
    /// (the [`Unverified`] verifier) with default configuration.
    pub fn new() -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            verifier: Arc::new(Unverified),
            config: RegistryConfig::default(),
        }
    }

    /// Use the given submission verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn SubmissionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Use the given configuration.
    #[must_use]
    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    // ── Game lifecycle ──────────────────────────────────────────────

    /// Create a game with the host registered game-side. The host's player
    /// connection is only created by their first `JoinGame`, so that join is
    /// a first join (single `GameJoined`) like anyone else's.
    ///
    /// The host handle is checked against the verifier; an *unreachable*
    /// verifier does not block creation.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidJoin`] for a nil player id or blank handle,
    /// [`SessionError::HandleNotFound`] when the verifier rejects the handle.
    pub async fn create_game(
        &self,
        host_id: PlayerId,
        cf_handle: &str,
        config: GameConfig,
    ) -> Result<GameId> {
        let cf_handle = validate_identity(host_id, cf_handle)?;
        match self.verifier.handle_exists(cf_handle).await {
            Ok(true) => {}
            Ok(false) => return Err(SessionError::HandleNotFound(cf_handle.to_string())),
            Err(e) => {
                warn!(error = %e, "handle verification unavailable, creating game anyway");
            }
        }

        let game_id = Uuid::new_v4();
        let (events, _) = broadcast::channel(self.config.event_channel_capacity.max(1));
        let session = GameSession {
            game: GameState::new(game_id, host_id, cf_handle.to_string(), config),
            connections: HashMap::new(),
            events,
            next_generation: 0,
        };
        self.games
            .write()
            .await
            .insert(game_id, Arc::new(Mutex::new(session)));
        info!(game_id = %game_id, host_id = %host_id, "game created");
        Ok(game_id)
    }

    /// Remove a game and every player connection in it. Returns `false`
    /// when the game was not present.
    pub async fn remove_game(&self, game_id: GameId) -> bool {
        self.games.write().await.remove(&game_id).is_some()
    }

    // ── Join handling ───────────────────────────────────────────────

    /// Resolve a `JoinGame`: bind `transport` as the player's single live
    /// transport and send the join responses on it.
    ///
    /// First join: one `GameJoined` (with a full snapshot). Rejoin: the
    /// prior transport is detached, then `GameJoined` followed by
    /// `GameUpdate` — always in that order, so clients can tell the
    /// acknowledgement from the state sync.
    ///
    /// If the transport dies before the responses are delivered, a first
    /// join is rolled back completely (no half-initialized connection) and a
    /// rejoin leaves the player `Disconnected` and eligible to rejoin again.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownGame`], [`SessionError::InvalidJoin`],
    /// [`SessionError::GameFull`], [`SessionError::GameEnded`],
    /// [`SessionError::HandleNotFound`] and transport errors.
    pub async fn handle_join<T: Transport>(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        cf_handle: &str,
        transport: &mut T,
    ) -> Result<JoinOutcome> {
        let cf_handle = validate_identity(player_id, cf_handle)?;
        let session = self.session(game_id).await?;

        // Locked phase: bookkeeping and snapshot. A brand-new guest needs a
        // handle check against the verifier first, which must not happen
        // under the lock — release, verify, then re-validate from scratch
        // because a concurrent join may have changed the session meanwhile.
        let mut handle_verified = false;
        let prepared = loop {
            let mut guard = session.lock().await;
            match Self::prepare_join(&mut guard, player_id, cf_handle, handle_verified)? {
                Some(prepared) => break prepared,
                None => {
                    drop(guard);
                    match self.verifier.handle_exists(cf_handle).await {
                        Ok(true) => handle_verified = true,
                        Ok(false) => {
                            return Err(SessionError::HandleNotFound(cf_handle.to_string()))
                        }
                        // Unlike game creation, admitting a second player
                        // fails closed: an unverifiable handle cannot enter
                        // someone else's game.
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        let PreparedJoin {
            rejoined,
            cf_handle,
            generation,
            detach,
            events,
            snapshot,
        } = prepared;
        let version = snapshot.version;

        debug!(
            game_id = %game_id,
            player_id = %player_id,
            rejoined,
            "transport bound, sending join responses"
        );

        // Send phase: the session lock is no longer held, so transport
        // backpressure cannot stall other players.
        let mut messages = Vec::with_capacity(2);
        messages.push(ServerMessage::GameJoined(Box::new(GameJoinedPayload {
            game_id,
            player_id,
            cf_handle,
            rejoined,
            snapshot: snapshot.clone(),
        })));
        if rejoined {
            messages.push(ServerMessage::GameUpdate(Box::new(snapshot)));
        }

        let sent: Result<()> = async {
            for message in messages {
                transport.send(serde_json::to_string(&message)?).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = sent {
            warn!(
                game_id = %game_id,
                player_id = %player_id,
                error = %e,
                "join responses undeliverable, rolling back"
            );
            self.rollback_join(&session, player_id, generation, rejoined)
                .await;
            return Err(e);
        }

        // Commit: record the version the client has seen, unless an even
        // newer join superseded this binding while we were sending.
        {
            let mut guard = session.lock().await;
            if guard.binding_generation(player_id) == Some(generation) {
                if let Some(connection) = guard.connections.get_mut(&player_id) {
                    connection.last_snapshot_version = version;
                }
            }
        }

        Ok(JoinOutcome {
            game_id,
            player_id,
            rejoined,
            generation,
            detach,
            events,
        })
    }

    /// The part of a join that runs under the session lock. Returns `None`
    /// when the caller must verify the handle first and try again.
    fn prepare_join(
        guard: &mut GameSession,
        player_id: PlayerId,
        cf_handle: &str,
        handle_verified: bool,
    ) -> Result<Option<PreparedJoin>> {
        // Rejoin: the player connection already exists. Works even on a
        // finished game so a reloading client can still fetch the outcome.
        if let Some(connection) = guard.connections.get(&player_id) {
            let cf_handle = connection.cf_handle.clone();
            let (generation, detach, events) = guard.bind(player_id, &cf_handle);
            let snapshot = guard
                .game
                .snapshot_for(player_id)
                .ok_or(SessionError::NotInGame)?;
            return Ok(Some(PreparedJoin {
                rejoined: true,
                cf_handle,
                generation,
                detach,
                events,
                snapshot,
            }));
        }

        // First join of a player the game already knows (the host after
        // game creation, or a guest whose first join was rolled back).
        if guard.game.contains_player(player_id) {
            if guard.game.is_finished() {
                return Err(SessionError::GameEnded);
            }
            let (generation, detach, events) = guard.bind(player_id, cf_handle);
            let snapshot = guard
                .game
                .snapshot_for(player_id)
                .ok_or(SessionError::NotInGame)?;
            return Ok(Some(PreparedJoin {
                rejoined: false,
                cf_handle: cf_handle.to_string(),
                generation,
                detach,
                events,
                snapshot,
            }));
        }

        // Brand-new guest. Cheap rejections first, then demand a verified
        // handle before touching any state.
        if guard.game.is_finished() {
            return Err(SessionError::GameEnded);
        }
        if guard.game.status() != GameStatus::Waiting {
            return Err(SessionError::GameFull);
        }
        if !handle_verified {
            return Ok(None);
        }

        guard.game.add_guest(player_id, cf_handle.to_string())?;
        guard.broadcast(ServerMessage::PlayerJoined {
            player_id,
            cf_handle: cf_handle.to_string(),
        });
        let (generation, detach, events) = guard.bind(player_id, cf_handle);
        let snapshot = guard
            .game
            .snapshot_for(player_id)
            .ok_or(SessionError::NotInGame)?;
        Ok(Some(PreparedJoin {
            rejoined: false,
            cf_handle: cf_handle.to_string(),
            generation,
            detach,
            events,
            snapshot,
        }))
    }

    /// Undo a join whose responses never reached the client. Only acts if
    /// the failed binding is still the current one — a newer join owns the
    /// connection otherwise.
    async fn rollback_join(
        &self,
        session: &Arc<Mutex<GameSession>>,
        player_id: PlayerId,
        generation: u64,
        rejoined: bool,
    ) {
        let mut guard = session.lock().await;
        if guard.binding_generation(player_id) != Some(generation) {
            return;
        }
        if rejoined {
            if let Some(connection) = guard.connections.get_mut(&player_id) {
                connection.binding = None;
            }
        } else {
            guard.connections.remove(&player_id);
        }
    }

    /// Record that the driver owning `generation` lost its transport.
    /// A stale generation is ignored: a newer binding owns the connection.
    pub async fn mark_disconnected(&self, game_id: GameId, player_id: PlayerId, generation: u64) {
        let Ok(session) = self.session(game_id).await else {
            return;
        };
        let mut guard = session.lock().await;
        if guard.binding_generation(player_id) == Some(generation) {
            if let Some(connection) = guard.connections.get_mut(&player_id) {
                connection.binding = None;
                debug!(game_id = %game_id, player_id = %player_id, "player disconnected");
            }
        }
    }

    // ── Game operations ─────────────────────────────────────────────

    /// Install a player's fleet. Broadcasts `ShipsConfirmed` (and
    /// `GameStart` once both fleets are down); replies with a fresh
    /// snapshot. Re-sending an accepted fleet is acknowledged directly
    /// without re-announcing it.
    pub async fn place_ships(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        ships: &[ShipPlacement],
    ) -> Result<Vec<ServerMessage>> {
        let session = self.session(game_id).await?;
        let mut guard = session.lock().await;
        let report = guard.game.place_fleet(player_id, ships)?;
        let snapshot = guard
            .game
            .snapshot_for(player_id)
            .ok_or(SessionError::NotInGame)?;

        if report.already_placed {
            return Ok(vec![
                ServerMessage::ShipsConfirmed { player_id },
                ServerMessage::GameUpdate(Box::new(snapshot)),
            ]);
        }

        guard.broadcast(ServerMessage::ShipsConfirmed { player_id });
        if report.combat_started {
            info!(game_id = %game_id, "both fleets placed, combat started");
            guard.broadcast(ServerMessage::GameStart);
        }
        Ok(vec![ServerMessage::GameUpdate(Box::new(snapshot))])
    }

    /// Resolve a shot. The result reaches both players via broadcast;
    /// weapons locking and game end ride along as separate broadcasts.
    pub async fn fire(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        x: usize,
        y: usize,
    ) -> Result<Vec<ServerMessage>> {
        let session = self.session(game_id).await?;
        let mut guard = session.lock().await;
        let report = guard.game.fire(player_id, x, y)?;

        guard.broadcast(ServerMessage::ShotResult {
            x: report.x,
            y: report.y,
            hit: report.outcome == ShotOutcome::Hit,
            sunk: report.sunk,
            shooter_id: player_id,
        });
        if report.shooter_locked {
            guard.broadcast(ServerMessage::WeaponsLocked { player_id });
        }
        if let Some(over) = report.game_over {
            info!(game_id = %game_id, winner = ?over.winner_id, "game over");
            guard.broadcast(ServerMessage::GameOver {
                winner_id: over.winner_id,
                reason: over.reason,
            });
        }
        Ok(Vec::new())
    }

    /// Verify an accepted submission with the external judge and unlock the
    /// player's weapons on success. The judge lookup runs with no session
    /// lock held.
    pub async fn verify_submission(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        contest_id: i32,
        problem_index: &str,
    ) -> Result<Vec<ServerMessage>> {
        let session = self.session(game_id).await?;
        let cf_handle = {
            let mut guard = session.lock().await;
            guard
                .game
                .begin_verification(player_id, self.config.verification_cooldown)?
        };

        let accepted = self
            .verifier
            .accepted(&cf_handle, contest_id, problem_index)
            .await?;
        if !accepted {
            return Err(SessionError::SubmissionNotAccepted);
        }

        let mut guard = session.lock().await;
        guard.game.apply_accepted_solve(player_id)?;
        info!(game_id = %game_id, player_id = %player_id, "submission verified, weapons unlocked");
        guard.broadcast(ServerMessage::WeaponsUnlocked {
            player_id,
            reason: UnlockReason::Solved,
        });
        let snapshot = guard
            .game
            .snapshot_for(player_id)
            .ok_or(SessionError::NotInGame)?;
        Ok(vec![ServerMessage::GameUpdate(Box::new(snapshot))])
    }

    /// Spend a veto: the player stays locked for the scheduled penalty,
    /// then unlocks without solving (the ticker announces the expiry).
    pub async fn veto(&self, game_id: GameId, player_id: PlayerId) -> Result<Vec<ServerMessage>> {
        let session = self.session(game_id).await?;
        let mut guard = session.lock().await;
        let duration_secs = guard.game.start_veto(player_id)?;
        info!(game_id = %game_id, player_id = %player_id, duration_secs, "veto started");
        let snapshot = guard
            .game
            .snapshot_for(player_id)
            .ok_or(SessionError::NotInGame)?;
        Ok(vec![ServerMessage::GameUpdate(Box::new(snapshot))])
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Number of player connections in a game.
    pub async fn connection_count(&self, game_id: GameId) -> Result<usize> {
        let session = self.session(game_id).await?;
        let guard = session.lock().await;
        Ok(guard.connections.len())
    }

    /// Connection state of one player.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotInGame`] when no player connection exists.
    pub async fn connection_state(
        &self,
        game_id: GameId,
        player_id: PlayerId,
    ) -> Result<ConnectionState> {
        let session = self.session(game_id).await?;
        let guard = session.lock().await;
        let connection = guard
            .connections
            .get(&player_id)
            .ok_or(SessionError::NotInGame)?;
        Ok(if connection.binding.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        })
    }

    /// The snapshot version last sent to this player on a join or tick.
    pub async fn last_synced_version(&self, game_id: GameId, player_id: PlayerId) -> Result<u64> {
        let session = self.session(game_id).await?;
        let guard = session.lock().await;
        let connection = guard
            .connections
            .get(&player_id)
            .ok_or(SessionError::NotInGame)?;
        Ok(connection.last_snapshot_version)
    }

    /// A fresh personalized snapshot, without touching connection state.
    pub async fn game_snapshot(
        &self,
        game_id: GameId,
        player_id: PlayerId,
    ) -> Result<GameSnapshot> {
        let session = self.session(game_id).await?;
        let guard = session.lock().await;
        guard
            .game
            .snapshot_for(player_id)
            .ok_or(SessionError::NotInGame)
    }

    async fn session(&self, game_id: GameId) -> Result<Arc<Mutex<GameSession>>> {
        self.games
            .read()
            .await
            .get(&game_id)
            .cloned()
            .ok_or(SessionError::UnknownGame(game_id))
    }

    // ── Connection driver ───────────────────────────────────────────

    /// Drive one inbound connection to completion.
    ///
    /// The driver owns the transport and closes it exactly once, on every
    /// exit path: client disconnect, transport error, rejection of the join
    /// attempt, or detachment when a newer join supersedes this binding.
    /// The first message must be `JoinGame`; afterwards the driver forwards
    /// session events and dispatches game operations.
    pub async fn serve<T: Transport>(&self, game_id: GameId, mut transport: T) {
        debug!(game_id = %game_id, "connection driver started");
        let mut joined: Option<JoinOutcome> = None;

        loop {
            // Handshake phase: the first accepted message must be JoinGame.
            if joined.is_none() {
                let incoming = match transport.recv().await {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => {
                        warn!(game_id = %game_id, error = %e, "transport error before join");
                        break;
                    }
                    None => break,
                };
                let message = match serde_json::from_str::<ClientMessage>(&incoming) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(game_id = %game_id, error = %e, "unparseable message before join");
                        continue;
                    }
                };
                match message {
                    ClientMessage::JoinGame {
                        player_id,
                        cf_handle,
                    } => match self
                        .handle_join(game_id, player_id, &cf_handle, &mut transport)
                        .await
                    {
                        Ok(outcome) => joined = Some(outcome),
                        Err(e) => {
                            match e.error_code() {
                                Some(_) => send_error(&mut transport, &e).await,
                                // Transport-level failure: nothing to report.
                                None => break,
                            }
                            // A join that names a nonexistent game has
                            // nothing to wait for; other rejections leave
                            // the connection open for a corrected retry.
                            if matches!(e, SessionError::UnknownGame(_)) {
                                break;
                            }
                        }
                    },
                    _ => {
                        send_error(&mut transport, &SessionError::NotInGame).await;
                    }
                }
                continue;
            }

            // Joined: multiplex session events and client messages.
            let Some(outcome) = joined.as_mut() else {
                continue;
            };
            let (gid, pid, generation) = (outcome.game_id, outcome.player_id, outcome.generation);
            tokio::select! {
                biased;

                // A newer join owns the player now; this transport must
                // stop delivering and close.
                _ = &mut outcome.detach => {
                    debug!(game_id = %gid, player_id = %pid, "binding superseded, closing transport");
                    break;
                }

                event = outcome.events.recv() => match event {
                    Ok(event) => {
                        if self
                            .forward_event(gid, pid, generation, &mut transport, event)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The next tick snapshot resynchronizes us.
                        warn!(game_id = %gid, player_id = %pid, skipped, "event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => {
                        let message = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!(game_id = %gid, player_id = %pid, error = %e, "unparseable message");
                                continue;
                            }
                        };
                        if let ClientMessage::JoinGame { player_id, cf_handle } = message {
                            // Rejoin over the live connection: rebind in
                            // place and keep driving.
                            match self
                                .handle_join(gid, player_id, &cf_handle, &mut transport)
                                .await
                            {
                                Ok(new_outcome) => {
                                    if new_outcome.player_id != pid {
                                        self.mark_disconnected(gid, pid, generation).await;
                                    }
                                    *outcome = new_outcome;
                                }
                                Err(e) => {
                                    if e.error_code().is_some() {
                                        send_error(&mut transport, &e).await;
                                    } else {
                                        break;
                                    }
                                }
                            }
                            continue;
                        }
                        let replies = match self.dispatch(gid, pid, message).await {
                            Ok(replies) => replies,
                            Err(e) => {
                                send_error(&mut transport, &e).await;
                                continue;
                            }
                        };
                        if deliver(&mut transport, replies).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(game_id = %gid, player_id = %pid, error = %e, "transport receive error");
                        break;
                    }
                    None => break,
                }
            }
        }

        if let Err(e) = transport.close().await {
            debug!(game_id = %game_id, error = %e, "transport close failed");
        }
        if let Some(outcome) = joined {
            self.mark_disconnected(outcome.game_id, outcome.player_id, outcome.generation)
                .await;
        }
        debug!(game_id = %game_id, "connection driver exited");
    }

    async fn dispatch(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        message: ClientMessage,
    ) -> Result<Vec<ServerMessage>> {
        match message {
            // Handled by the driver, which owns the transport.
            ClientMessage::JoinGame { .. } => Ok(Vec::new()),
            ClientMessage::PlaceShips { ships } => {
                self.place_ships(game_id, player_id, &ships).await
            }
            ClientMessage::Fire { x, y } => self.fire(game_id, player_id, x, y).await,
            ClientMessage::SolveProblem {
                contest_id,
                problem_index,
            } => {
                self.verify_submission(game_id, player_id, contest_id, &problem_index)
                    .await
            }
            ClientMessage::Veto => self.veto(game_id, player_id).await,
        }
    }

    /// Forward one session event. Ticks become personalized snapshots; the
    /// snapshot is taken (and the synced version recorded) under the session
    /// lock, the send happens after release.
    async fn forward_event<T: Transport>(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        generation: u64,
        transport: &mut T,
        event: SessionEvent,
    ) -> Result<()> {
        let message = match event {
            SessionEvent::Broadcast(message) => message,
            SessionEvent::Tick => {
                let Ok(session) = self.session(game_id).await else {
                    // Game pruned while we were connected; nothing to send.
                    return Ok(());
                };
                let snapshot = {
                    let mut guard = session.lock().await;
                    let Some(snapshot) = guard.game.snapshot_for(player_id) else {
                        return Ok(());
                    };
                    if guard.binding_generation(player_id) == Some(generation) {
                        if let Some(connection) = guard.connections.get_mut(&player_id) {
                            connection.last_snapshot_version = snapshot.version;
                        }
                    }
                    snapshot
                };
                ServerMessage::GameUpdate(Box::new(snapshot))
            }
        };
        transport.send(serde_json::to_string(&message)?).await
    }

    // ── Ticker ──────────────────────────────────────────────────────

    /// Run the 1 Hz driver for every game: periodic resync ticks, veto
    /// expiries, match-clock timeouts and pruning of finished games.
    /// Spawn this once next to the accept loop; it runs until the registry
    /// is dropped.
    pub async fn run_ticker(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;

            let sessions: Vec<(GameId, Arc<Mutex<GameSession>>)> = self
                .games
                .read()
                .await
                .iter()
                .map(|(id, session)| (*id, Arc::clone(session)))
                .collect();

            let mut expired = Vec::new();
            for (game_id, session) in sessions {
                let mut guard = session.lock().await;
                for outcome in guard.game.tick() {
                    match outcome {
                        TickOutcome::VetoExpired(player_id) => {
                            info!(game_id = %game_id, player_id = %player_id, "veto expired, weapons unlocked");
                            guard.broadcast(ServerMessage::WeaponsUnlocked {
                                player_id,
                                reason: UnlockReason::VetoExpired,
                            });
                        }
                        TickOutcome::SuddenDeathStarted => {
                            // The status change reaches both players through
                            // the tick snapshots below.
                            info!(game_id = %game_id, "clock expired with a full tie, sudden death");
                        }
                        TickOutcome::GameOver(report) => {
                            info!(game_id = %game_id, winner = ?report.winner_id, "game over on timeout");
                            guard.broadcast(ServerMessage::GameOver {
                                winner_id: report.winner_id,
                                reason: report.reason,
                            });
                        }
                    }
                }
                let _ = guard.events.send(SessionEvent::Tick);

                if guard
                    .game
                    .finished_since()
                    .map(|since| since >= self.config.finished_retention)
                    .unwrap_or(false)
                {
                    expired.push(game_id);
                }
            }

            for game_id in expired {
                if self.remove_game(game_id).await {
                    info!(game_id = %game_id, "pruned finished game");
                }
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Reject nil player identifiers and blank handles before touching state.
fn validate_identity(player_id: PlayerId, cf_handle: &str) -> Result<&str> {
    if player_id.is_nil() {
        return Err(SessionError::InvalidJoin("nil player identifier".into()));
    }
    let cf_handle = cf_handle.trim();
    if cf_handle.is_empty() {
        return Err(SessionError::InvalidJoin("empty handle".into()));
    }
    Ok(cf_handle)
}

/// Send an `Error` envelope; delivery failures are logged, not propagated.
async fn send_error<T: Transport>(transport: &mut T, err: &SessionError) {
    let message = ServerMessage::from_error(err);
    match serde_json::to_string(&message) {
        Ok(text) => {
            if let Err(e) = transport.send(text).await {
                debug!(error = %e, "error report undeliverable");
            }
        }
        Err(e) => debug!(error = %e, "error report unserializable"),
    }
}

/// Send a batch of direct replies, stopping at the first transport failure.
async fn deliver<T: Transport>(
    transport: &mut T,
    replies: Vec<ServerMessage>,
) -> Result<()> {
    for reply in replies {
        transport.send(serde_json::to_string(&reply)?).await?;
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn registry_config_defaults() {
        let config = RegistryConfig::new();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.verification_cooldown, Duration::from_secs(10));
        assert_eq!(config.finished_retention, Duration::from_secs(300));
    }

    #[test]
    fn registry_config_builder_methods() {
        let config = RegistryConfig::new()
            .with_event_channel_capacity(0)
            .with_verification_cooldown(Duration::from_secs(3))
            .with_finished_retention(Duration::from_secs(60));
        assert_eq!(config.event_channel_capacity, 1, "capacity is clamped");
        assert_eq!(config.verification_cooldown, Duration::from_secs(3));
        assert_eq!(config.finished_retention, Duration::from_secs(60));
    }

    #[test]
    fn validate_identity_rejects_nil_and_blank() {
        let err = validate_identity(Uuid::nil(), "handle").unwrap_err();
        assert!(matches!(err, SessionError::InvalidJoin(_)));

        let err = validate_identity(Uuid::from_u128(1), "   ").unwrap_err();
        assert!(matches!(err, SessionError::InvalidJoin(_)));

        let trimmed = validate_identity(Uuid::from_u128(1), "  tourist ").unwrap();
        assert_eq!(trimmed, "tourist");
    }

    #[tokio::test]
    async fn create_game_rejects_invalid_identity() {
        let registry = SessionRegistry::new();
        let err = registry
            .create_game(Uuid::nil(), "host", GameConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidJoin(_)));
    }

    #[tokio::test]
    async fn remove_game_reports_presence() {
        let registry = SessionRegistry::new();
        let game_id = registry
            .create_game(Uuid::from_u128(1), "host", GameConfig::default())
            .await
            .unwrap();
        assert!(registry.remove_game(game_id).await);
        assert!(!registry.remove_game(game_id).await);
    }
}
