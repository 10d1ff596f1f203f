//! Wire types for the Gridlock game protocol.
//!
//! Every message is a JSON object with a `"type"` discriminator
//! (internally tagged), e.g. `{"type":"JoinGame","player_id":"…","cf_handle":"…"}`.
//! Large payloads are boxed to keep the enum small.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_codes::ErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for games.
pub type GameId = Uuid;

/// Unique identifier for players.
pub type PlayerId = Uuid;

/// Row-major grid cells (`grid[y][x]`).
pub type GridCells = Vec<Vec<CellState>>;

// ── Configuration ───────────────────────────────────────────────────

/// Problem difficulty band chosen at game creation.
///
/// Maps to a target judge rating via [`rating()`](Difficulty::rating).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Target judge problem rating for this band.
    pub fn rating(self) -> u32 {
        match self {
            Self::Easy => 800,
            Self::Medium => 1200,
            Self::Hard => 1600,
        }
    }
}

/// How harshly vetoes are penalized.
///
/// Each tier maps to an escalating penalty schedule: the first veto costs
/// the first duration, the second veto the second, and so on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VetoStrictness {
    /// 5, 7 and 10 minutes.
    Low,
    /// 7, 10 and 15 minutes.
    #[default]
    Medium,
    /// 10, 15 and 20 minutes.
    High,
}

impl VetoStrictness {
    /// Veto penalty durations in seconds, indexed by vetoes already spent.
    pub fn penalties(self) -> [u64; 3] {
        match self {
            Self::Low => [300, 420, 600],
            Self::Medium => [420, 600, 900],
            Self::High => [600, 900, 1200],
        }
    }
}

/// Game configuration, fixed at creation and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameConfig {
    /// Problem difficulty band.
    pub difficulty: Difficulty,
    /// Heat value at which weapons lock.
    pub heat_threshold: u32,
    /// Total game duration in seconds.
    pub game_duration_secs: u64,
    /// How many vetoes each player may spend.
    pub max_vetoes: u32,
    /// Veto penalty durations in seconds, indexed by vetoes already spent.
    pub veto_penalties: [u64; 3],
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Easy,
            heat_threshold: 7,
            game_duration_secs: 45 * 60,
            max_vetoes: 3,
            veto_penalties: VetoStrictness::Medium.penalties(),
        }
    }
}

impl GameConfig {
    /// Set the problem difficulty band.
    #[must_use]
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Set the heat threshold at which weapons lock.
    #[must_use]
    pub fn with_heat_threshold(mut self, heat_threshold: u32) -> Self {
        self.heat_threshold = heat_threshold;
        self
    }

    /// Set the game duration in minutes (the unit used at game creation).
    #[must_use]
    pub fn with_duration_mins(mut self, mins: u64) -> Self {
        self.game_duration_secs = mins * 60;
        self
    }

    /// Set the veto penalty schedule from a strictness tier.
    #[must_use]
    pub fn with_veto_strictness(mut self, strictness: VetoStrictness) -> Self {
        self.veto_penalties = strictness.penalties();
        self
    }
}

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle phase of a game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Host created the game, waiting for the second player.
    #[default]
    Waiting,
    /// Both players present, placing their fleets.
    PlacingShips,
    /// Combat in progress.
    Playing,
    /// Time ran out with a full tie; first hit wins.
    SuddenDeath,
    /// Game over.
    Finished,
}

/// State of one grid cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    #[default]
    Empty,
    Ship,
    Hit,
    Miss,
}

/// Why a player's weapons were unlocked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    /// An accepted submission was verified.
    Solved,
    /// The veto penalty timer ran out.
    VetoExpired,
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    /// Every ship of the losing player was sunk.
    AllShipsSunk,
    /// The clock ran out and the tiebreak produced a winner.
    Timeout,
    /// First hit in sudden death.
    SuddenDeath,
}

// ── Structs ─────────────────────────────────────────────────────────

/// Position and orientation of one ship.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShipPlacement {
    /// Column of the bow, `0..10`.
    pub x: usize,
    /// Row of the bow, `0..10`.
    pub y: usize,
    /// Ship length in cells.
    pub size: u8,
    /// `true` = extends downwards, `false` = extends rightwards.
    pub vertical: bool,
}

/// Per-player combat statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlayerStats {
    pub cells_hit: u32,
    pub cells_missed: u32,
    pub ships_sunk: u32,
    pub problems_solved: u32,
}

// ── Snapshots ───────────────────────────────────────────────────────

/// The requesting player's own view of their state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSnapshot {
    pub player_id: PlayerId,
    pub cf_handle: String,
    /// Current heat; weapons lock at the configured threshold.
    pub heat: u32,
    pub weapons_locked: bool,
    pub vetoes_remaining: u32,
    /// Seconds left on an active veto penalty, if one is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub veto_time_remaining_secs: Option<u64>,
    pub ships_placed: bool,
    /// The player's own fleet, so a reloading client can redraw it.
    pub ships: Vec<ShipPlacement>,
    pub grid: GridCells,
    pub stats: PlayerStats,
}

/// The opponent as visible to the requesting player.
///
/// Unhit ship cells are masked to [`CellState::Empty`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpponentSnapshot {
    pub player_id: PlayerId,
    pub cf_handle: String,
    pub ships_placed: bool,
    pub grid: GridCells,
}

/// A self-contained, personalized view of the game, sufficient for a client
/// to resynchronize from scratch without replaying history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSnapshot {
    /// Monotonically increasing state version; bumped on every mutation.
    pub version: u64,
    pub status: GameStatus,
    pub config: GameConfig,
    pub time_remaining_secs: u64,
    pub you: PlayerSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent: Option<OpponentSnapshot>,
}

/// Payload for the `GameJoined` server message.
/// Boxed in `ServerMessage` to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameJoinedPayload {
    pub game_id: GameId,
    /// The identifier this connection is now bound to.
    pub player_id: PlayerId,
    pub cf_handle: String,
    /// `true` when the player was already registered and this join rebound
    /// the transport; a `GameUpdate` follows immediately.
    pub rejoined: bool,
    pub snapshot: GameSnapshot,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join a game, or rebind the transport if already registered in it.
    /// MUST be the first message on every connection.
    JoinGame {
        player_id: PlayerId,
        cf_handle: String,
    },
    /// Place the whole fleet at once.
    PlaceShips { ships: Vec<ShipPlacement> },
    /// Fire at the opponent's grid.
    Fire { x: usize, y: usize },
    /// Ask the server to verify an accepted submission and unlock weapons.
    SolveProblem {
        contest_id: i32,
        problem_index: String,
    },
    /// Spend a veto: accept a timed penalty instead of solving.
    Veto,
}

/// Message types sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Join acknowledged (boxed to reduce enum size). On a rejoin this is
    /// always followed by a `GameUpdate` carrying the authoritative state.
    GameJoined(Box<GameJoinedPayload>),
    /// Full personalized state snapshot (boxed to reduce enum size).
    GameUpdate(Box<GameSnapshot>),
    /// The other player joined the game.
    PlayerJoined {
        player_id: PlayerId,
        cf_handle: String,
    },
    /// A player finished placing their fleet.
    ShipsConfirmed { player_id: PlayerId },
    /// Both fleets placed; combat begins.
    GameStart,
    /// Outcome of a shot, broadcast to both players.
    ShotResult {
        x: usize,
        y: usize,
        hit: bool,
        sunk: bool,
        shooter_id: PlayerId,
    },
    /// A player's heat reached the threshold; their weapons are locked.
    WeaponsLocked { player_id: PlayerId },
    /// A player's weapons were unlocked.
    WeaponsUnlocked {
        player_id: PlayerId,
        reason: UnlockReason,
    },
    /// The game ended.
    GameOver {
        winner_id: Option<PlayerId>,
        reason: GameOverReason,
    },
    /// Error report.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
}

impl ServerMessage {
    /// Build an `Error` message from a [`SessionError`](crate::SessionError),
    /// using its wire code when it has one.
    pub fn from_error(err: &crate::error::SessionError) -> Self {
        Self::Error {
            message: err.to_string(),
            error_code: err.error_code(),
        }
    }
}
