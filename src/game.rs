//! Authoritative game state for a Gridlock match.
//!
//! One [`GameState`] holds everything the server knows about a match: both
//! players' grids and fleets, heat and lock state, veto timers, the clock and
//! the monotonically increasing snapshot version. All mutation goes through
//! methods that return typed reports, so the registry layer only decides what
//! to send, never how the rules work.

use std::time::{Duration, Instant};

use crate::error::{Result, SessionError};
use crate::protocol::{
    CellState, GameConfig, GameId, GameOverReason, GameSnapshot, GameStatus, GridCells,
    OpponentSnapshot, PlayerId, PlayerSnapshot, PlayerStats, ShipPlacement,
};

/// Side length of the square grid.
pub const GRID_SIZE: usize = 10;

/// Required fleet composition, largest ship first.
pub const FLEET_SIZES: [u8; 5] = [5, 4, 3, 3, 2];

// ── Grid ────────────────────────────────────────────────────────────

/// Outcome of a single shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotOutcome {
    /// A ship cell was struck.
    Hit,
    /// Open water.
    Miss,
    /// The cell had already been fired at; no state changed.
    Repeat,
}

/// One player's 10×10 board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    cells: [[CellState; GRID_SIZE]; GRID_SIZE],
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

impl Grid {
    /// An all-empty grid.
    pub fn new() -> Self {
        Self {
            cells: [[CellState::Empty; GRID_SIZE]; GRID_SIZE],
        }
    }

    fn cell(&self, x: usize, y: usize) -> Option<CellState> {
        self.cells.get(y).and_then(|row| row.get(x)).copied()
    }

    fn set(&mut self, x: usize, y: usize, state: CellState) {
        if let Some(cell) = self.cells.get_mut(y).and_then(|row| row.get_mut(x)) {
            *cell = state;
        }
    }

    /// Resolve a shot against this grid.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidShot`] when the target lies outside
    /// the grid.
    pub fn receive_shot(&mut self, x: usize, y: usize) -> Result<ShotOutcome> {
        match self.cell(x, y).ok_or(SessionError::InvalidShot)? {
            CellState::Empty => {
                self.set(x, y, CellState::Miss);
                Ok(ShotOutcome::Miss)
            }
            CellState::Ship => {
                self.set(x, y, CellState::Hit);
                Ok(ShotOutcome::Hit)
            }
            CellState::Hit | CellState::Miss => Ok(ShotOutcome::Repeat),
        }
    }

    /// `true` once no un-hit ship cell remains.
    pub fn all_ships_sunk(&self) -> bool {
        self.cells
            .iter()
            .flatten()
            .all(|cell| *cell != CellState::Ship)
    }

    /// Row-major copy of the cells for snapshots.
    pub fn to_cells(&self) -> GridCells {
        self.cells.iter().map(|row| row.to_vec()).collect()
    }

    /// Like [`to_cells`](Self::to_cells) but with un-hit ship cells masked
    /// to empty — the view an opponent is allowed to see.
    pub fn to_masked_cells(&self) -> GridCells {
        self.cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        CellState::Empty | CellState::Ship => CellState::Empty,
                        CellState::Hit => CellState::Hit,
                        CellState::Miss => CellState::Miss,
                    })
                    .collect()
            })
            .collect()
    }
}

// ── Ships ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ship {
    placement: ShipPlacement,
    hits: u8,
    sunk: bool,
}

impl Ship {
    fn covers(&self, x: usize, y: usize) -> bool {
        let p = self.placement;
        if p.vertical {
            x == p.x && y >= p.y && y < p.y + p.size as usize
        } else {
            y == p.y && x >= p.x && x < p.x + p.size as usize
        }
    }
}

// ── Player ──────────────────────────────────────────────────────────

/// One player's game-side state (not their connection — the registry owns
/// that separately).
#[derive(Debug, Clone)]
pub struct PlayerState {
    id: PlayerId,
    cf_handle: String,
    grid: Grid,
    ships: Vec<Ship>,
    heat: u32,
    weapons_locked: bool,
    vetoes_used: u32,
    veto_started_at: Option<Instant>,
    last_verification_attempt: Option<Instant>,
    ships_placed: bool,
    stats: PlayerStats,
}

impl PlayerState {
    fn new(id: PlayerId, cf_handle: String) -> Self {
        Self {
            id,
            cf_handle,
            grid: Grid::new(),
            ships: Vec::new(),
            heat: 0,
            weapons_locked: false,
            vetoes_used: 0,
            veto_started_at: None,
            last_verification_attempt: None,
            ships_placed: false,
            stats: PlayerStats::default(),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn cf_handle(&self) -> &str {
        &self.cf_handle
    }

    pub fn heat(&self) -> u32 {
        self.heat
    }

    pub fn weapons_locked(&self) -> bool {
        self.weapons_locked
    }

    pub fn ships_placed(&self) -> bool {
        self.ships_placed
    }

    pub fn stats(&self) -> PlayerStats {
        self.stats
    }

    /// Seconds left on the running veto penalty, if any.
    pub fn veto_time_remaining(&self, config: &GameConfig) -> Option<u64> {
        let started = self.veto_started_at?;
        let duration = config
            .veto_penalties
            .get(self.vetoes_used.saturating_sub(1) as usize)
            .copied()
            .unwrap_or(900);
        let elapsed = started.elapsed().as_secs();
        (elapsed < duration).then(|| duration - elapsed)
    }

    /// `true` when a veto timer is running and has passed its deadline.
    fn veto_expired(&self, config: &GameConfig) -> bool {
        self.veto_started_at.is_some() && self.veto_time_remaining(config).is_none()
    }

    fn unlock_weapons(&mut self) {
        self.weapons_locked = false;
        self.heat = 0;
        self.veto_started_at = None;
    }

    /// Install a full fleet, replacing anything placed before.
    ///
    /// Validates composition, bounds and overlap; on any failure the board
    /// is left cleared so the client can retry.
    fn place_fleet(&mut self, placements: &[ShipPlacement]) -> Result<()> {
        let mut sizes: Vec<u8> = placements.iter().map(|p| p.size).collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        if sizes != FLEET_SIZES {
            return Err(SessionError::InvalidFleet(format!(
                "expected ship sizes {FLEET_SIZES:?}, got {sizes:?}"
            )));
        }

        // Clear any previous attempt so retries start from scratch.
        self.grid = Grid::new();
        self.ships.clear();

        for placement in placements {
            self.place_ship(*placement)?;
        }
        self.ships_placed = true;
        Ok(())
    }

    fn place_ship(&mut self, placement: ShipPlacement) -> Result<()> {
        let ShipPlacement {
            x,
            y,
            size,
            vertical,
        } = placement;

        if x >= GRID_SIZE || y >= GRID_SIZE {
            return Err(SessionError::InvalidPlacement("bow out of bounds"));
        }
        let (end_x, end_y) = if vertical {
            (x, y + size as usize)
        } else {
            (x + size as usize, y)
        };
        if end_x > GRID_SIZE || end_y > GRID_SIZE {
            return Err(SessionError::InvalidPlacement("stern beyond grid edge"));
        }

        for i in 0..size as usize {
            let (cx, cy) = if vertical { (x, y + i) } else { (x + i, y) };
            if self.grid.cell(cx, cy) != Some(CellState::Empty) {
                return Err(SessionError::InvalidPlacement("overlaps another ship"));
            }
        }

        for i in 0..size as usize {
            let (cx, cy) = if vertical { (x, y + i) } else { (x + i, y) };
            self.grid.set(cx, cy, CellState::Ship);
        }
        self.ships.push(Ship {
            placement,
            hits: 0,
            sunk: false,
        });
        Ok(())
    }

    fn snapshot(&self, config: &GameConfig) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.id,
            cf_handle: self.cf_handle.clone(),
            heat: self.heat,
            weapons_locked: self.weapons_locked,
            vetoes_remaining: config.max_vetoes.saturating_sub(self.vetoes_used),
            veto_time_remaining_secs: self.veto_time_remaining(config),
            ships_placed: self.ships_placed,
            ships: self.ships.iter().map(|s| s.placement).collect(),
            grid: self.grid.to_cells(),
            stats: self.stats,
        }
    }

    fn opponent_snapshot(&self) -> OpponentSnapshot {
        OpponentSnapshot {
            player_id: self.id,
            cf_handle: self.cf_handle.clone(),
            ships_placed: self.ships_placed,
            grid: self.grid.to_masked_cells(),
        }
    }
}

// ── Reports ─────────────────────────────────────────────────────────

/// What a fleet placement did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementReport {
    /// The fleet was already down; nothing was mutated.
    pub already_placed: bool,
    /// Both fleets are now placed and combat has started.
    pub combat_started: bool,
}

/// How a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameOverReport {
    pub winner_id: Option<PlayerId>,
    pub reason: GameOverReason,
}

/// What a shot did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireReport {
    pub x: usize,
    pub y: usize,
    pub outcome: ShotOutcome,
    /// This shot sank a ship (not merely hit one).
    pub sunk: bool,
    /// The shooter's heat crossed the threshold on this shot.
    pub shooter_locked: bool,
    pub game_over: Option<GameOverReport>,
}

/// Side effects of a 1 Hz tick, for the registry to broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A veto penalty timer expired; the player's weapons unlocked.
    VetoExpired(PlayerId),
    /// The clock ran out with a full tie; first hit now wins.
    SuddenDeathStarted,
    /// The game ended.
    GameOver(GameOverReport),
}

/// Winner resolution when the clock runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiebreakResult {
    HostWins,
    GuestWins,
    /// Everything tied; the match continues in sudden death.
    SuddenDeath,
}

// ── Game ────────────────────────────────────────────────────────────

/// Authoritative state of one match.
#[derive(Debug, Clone)]
pub struct GameState {
    id: GameId,
    config: GameConfig,
    status: GameStatus,
    host: PlayerState,
    guest: Option<PlayerState>,
    version: u64,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl GameState {
    /// Create a match with the host registered game-side. The host's
    /// *connection* is only created by their first `JoinGame`.
    pub fn new(id: GameId, host_id: PlayerId, host_handle: String, config: GameConfig) -> Self {
        Self {
            id,
            config,
            status: GameStatus::Waiting,
            host: PlayerState::new(host_id, host_handle),
            guest: None,
            version: 1,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Current snapshot version. Bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }

    /// How long ago the game finished, if it has.
    pub fn finished_since(&self) -> Option<Duration> {
        self.finished_at.map(|at| at.elapsed())
    }

    pub fn contains_player(&self, player_id: PlayerId) -> bool {
        self.player(player_id).is_some()
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&PlayerState> {
        if self.host.id == player_id {
            Some(&self.host)
        } else {
            self.guest.as_ref().filter(|g| g.id == player_id)
        }
    }

    fn player_mut(&mut self, player_id: PlayerId) -> Result<&mut PlayerState> {
        if self.host.id == player_id {
            Ok(&mut self.host)
        } else {
            self.guest
                .as_mut()
                .filter(|g| g.id == player_id)
                .ok_or(SessionError::NotInGame)
        }
    }

    /// `(actor, opponent)` pair, or [`SessionError::NotInGame`].
    fn split_players(&mut self, actor: PlayerId) -> Result<(&mut PlayerState, &mut PlayerState)> {
        let guest = self.guest.as_mut().ok_or(SessionError::GameNotStarted)?;
        if self.host.id == actor {
            Ok((&mut self.host, guest))
        } else if guest.id == actor {
            Ok((guest, &mut self.host))
        } else {
            Err(SessionError::NotInGame)
        }
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Seconds left on the match clock (the full duration until combat starts).
    pub fn time_remaining_secs(&self) -> u64 {
        let elapsed = self
            .started_at
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0);
        self.config.game_duration_secs.saturating_sub(elapsed)
    }

    /// Register the second player.
    ///
    /// # Errors
    ///
    /// [`SessionError::GameEnded`] after the game finished,
    /// [`SessionError::GameFull`] when both seats are taken.
    pub fn add_guest(&mut self, player_id: PlayerId, cf_handle: String) -> Result<()> {
        if self.is_finished() {
            return Err(SessionError::GameEnded);
        }
        if self.guest.is_some() {
            return Err(SessionError::GameFull);
        }
        self.guest = Some(PlayerState::new(player_id, cf_handle));
        self.status = GameStatus::PlacingShips;
        self.bump();
        Ok(())
    }

    /// Install a player's fleet.
    ///
    /// Re-sending an already-accepted fleet is acknowledged without
    /// mutation, so a reloading client can never wipe its own board.
    pub fn place_fleet(
        &mut self,
        player_id: PlayerId,
        placements: &[ShipPlacement],
    ) -> Result<PlacementReport> {
        match self.status {
            GameStatus::Playing | GameStatus::SuddenDeath => {
                return Err(SessionError::PlacementClosed)
            }
            GameStatus::Finished => return Err(SessionError::GameEnded),
            GameStatus::Waiting | GameStatus::PlacingShips => {}
        }

        let player = self.player_mut(player_id)?;
        if player.ships_placed {
            return Ok(PlacementReport {
                already_placed: true,
                combat_started: false,
            });
        }
        player.place_fleet(placements)?;

        let combat_started = self.host.ships_placed
            && self.guest.as_ref().map(|g| g.ships_placed).unwrap_or(false);
        if combat_started {
            self.status = GameStatus::Playing;
            self.started_at = Some(Instant::now());
        }
        self.bump();
        Ok(PlacementReport {
            already_placed: false,
            combat_started,
        })
    }

    /// Resolve a shot by `shooter` at the opponent's grid.
    pub fn fire(&mut self, shooter: PlayerId, x: usize, y: usize) -> Result<FireReport> {
        match self.status {
            GameStatus::Playing | GameStatus::SuddenDeath => {}
            GameStatus::Finished => return Err(SessionError::GameEnded),
            GameStatus::Waiting | GameStatus::PlacingShips => {
                return Err(SessionError::GameNotStarted)
            }
        }
        let sudden_death = self.status == GameStatus::SuddenDeath;
        let config = self.config.clone();

        let (player, opponent) = self.split_players(shooter)?;

        if player.weapons_locked {
            // An expired veto timer unlocks inline so the shot goes through
            // even if the ticker has not caught up yet.
            if player.veto_expired(&config) {
                player.unlock_weapons();
            } else {
                return Err(SessionError::WeaponsLocked {
                    veto_remaining_secs: player.veto_time_remaining(&config),
                });
            }
        }

        let outcome = opponent.grid.receive_shot(x, y)?;
        let mut sunk = false;
        match outcome {
            ShotOutcome::Hit => {
                player.stats.cells_hit += 1;
                for ship in &mut opponent.ships {
                    if ship.covers(x, y) {
                        ship.hits += 1;
                        if ship.hits >= ship.placement.size && !ship.sunk {
                            ship.sunk = true;
                            player.stats.ships_sunk += 1;
                            sunk = true;
                        }
                        break;
                    }
                }
            }
            ShotOutcome::Miss => {
                player.stats.cells_missed += 1;
            }
            // A repeat shot costs nothing and heats nothing.
            ShotOutcome::Repeat => {}
        }

        let mut shooter_locked = false;
        if outcome != ShotOutcome::Repeat {
            player.heat += 1;
            if player.heat >= config.heat_threshold {
                player.weapons_locked = true;
                shooter_locked = true;
            }
        }

        let victory = opponent.grid.all_ships_sunk() && opponent.ships_placed;
        let sudden_death_win = sudden_death && outcome == ShotOutcome::Hit;
        let game_over = if victory || sudden_death_win {
            self.status = GameStatus::Finished;
            self.finished_at = Some(Instant::now());
            Some(GameOverReport {
                winner_id: Some(shooter),
                reason: if sudden_death_win && !victory {
                    GameOverReason::SuddenDeath
                } else {
                    GameOverReason::AllShipsSunk
                },
            })
        } else {
            None
        };

        self.bump();
        Ok(FireReport {
            x,
            y,
            outcome,
            sunk,
            shooter_locked,
            game_over,
        })
    }

    /// Spend a veto: keep weapons locked for the scheduled penalty, after
    /// which they unlock without solving.
    ///
    /// Returns the penalty duration in seconds.
    pub fn start_veto(&mut self, player_id: PlayerId) -> Result<u64> {
        let max_vetoes = self.config.max_vetoes;
        let penalties = self.config.veto_penalties;
        let player = self.player_mut(player_id)?;

        if !player.weapons_locked {
            return Err(SessionError::VetoNotAvailable);
        }
        if player.vetoes_used >= max_vetoes {
            return Err(SessionError::NoVetoesRemaining);
        }
        let duration = penalties
            .get(player.vetoes_used as usize)
            .copied()
            .unwrap_or(900);
        player.veto_started_at = Some(Instant::now());
        player.vetoes_used += 1;
        self.bump();
        Ok(duration)
    }

    /// Gate a verification attempt: rejects during an active veto and
    /// inside the cooldown window, then records the attempt and hands back
    /// the player's judge handle for the lookup.
    pub fn begin_verification(&mut self, player_id: PlayerId, cooldown: Duration) -> Result<String> {
        let config = self.config.clone();
        let player = self.player_mut(player_id)?;

        if player.veto_time_remaining(&config).is_some() {
            return Err(SessionError::VetoActive);
        }
        if let Some(last) = player.last_verification_attempt {
            let elapsed = last.elapsed();
            if elapsed < cooldown {
                return Err(SessionError::VerificationCooldown {
                    retry_after_secs: (cooldown - elapsed).as_secs().max(1),
                });
            }
        }
        player.last_verification_attempt = Some(Instant::now());
        Ok(player.cf_handle.clone())
    }

    /// Apply a verified accepted submission: unlock weapons, reset heat,
    /// credit the solve.
    pub fn apply_accepted_solve(&mut self, player_id: PlayerId) -> Result<()> {
        let player = self.player_mut(player_id)?;
        player.unlock_weapons();
        player.stats.problems_solved += 1;
        self.bump();
        Ok(())
    }

    /// Advance time-driven state: veto expiries and the match clock.
    pub fn tick(&mut self) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        if self.status != GameStatus::Playing {
            return outcomes;
        }

        let config = self.config.clone();
        let mut expired = Vec::new();
        if self.host.weapons_locked && self.host.veto_expired(&config) {
            expired.push(self.host.id);
        }
        if let Some(guest) = &self.guest {
            if guest.weapons_locked && guest.veto_expired(&config) {
                expired.push(guest.id);
            }
        }
        for id in expired {
            if let Ok(player) = self.player_mut(id) {
                player.unlock_weapons();
            }
            outcomes.push(TickOutcome::VetoExpired(id));
            self.bump();
        }

        if self.time_remaining_secs() == 0 {
            match self.determine_winner() {
                TiebreakResult::HostWins => {
                    self.status = GameStatus::Finished;
                    self.finished_at = Some(Instant::now());
                    outcomes.push(TickOutcome::GameOver(GameOverReport {
                        winner_id: Some(self.host.id),
                        reason: GameOverReason::Timeout,
                    }));
                }
                TiebreakResult::GuestWins => {
                    self.status = GameStatus::Finished;
                    self.finished_at = Some(Instant::now());
                    outcomes.push(TickOutcome::GameOver(GameOverReport {
                        winner_id: self.guest.as_ref().map(|g| g.id),
                        reason: GameOverReason::Timeout,
                    }));
                }
                TiebreakResult::SuddenDeath => {
                    self.status = GameStatus::SuddenDeath;
                    self.host.unlock_weapons();
                    if let Some(guest) = &mut self.guest {
                        guest.unlock_weapons();
                    }
                    outcomes.push(TickOutcome::SuddenDeathStarted);
                }
            }
            self.bump();
        }
        outcomes
    }

    /// Resolve the winner when the clock runs out: surviving ships, then
    /// cells hit, then problems solved; a full tie goes to sudden death.
    pub fn determine_winner(&self) -> TiebreakResult {
        let host = &self.host;
        let guest = match &self.guest {
            Some(g) => g,
            // A missing guest at the deadline forfeits the match.
            None => return TiebreakResult::HostWins,
        };

        let host_afloat = host.ships.iter().filter(|s| !s.sunk).count();
        let guest_afloat = guest.ships.iter().filter(|s| !s.sunk).count();
        if host_afloat != guest_afloat {
            return if host_afloat > guest_afloat {
                TiebreakResult::HostWins
            } else {
                TiebreakResult::GuestWins
            };
        }

        if host.stats.cells_hit != guest.stats.cells_hit {
            return if host.stats.cells_hit > guest.stats.cells_hit {
                TiebreakResult::HostWins
            } else {
                TiebreakResult::GuestWins
            };
        }

        if host.stats.problems_solved != guest.stats.problems_solved {
            return if host.stats.problems_solved > guest.stats.problems_solved {
                TiebreakResult::HostWins
            } else {
                TiebreakResult::GuestWins
            };
        }

        TiebreakResult::SuddenDeath
    }

    /// Personalized full snapshot for `player_id`, or `None` if that player
    /// is not in this game. The opponent's un-hit ship cells are masked.
    pub fn snapshot_for(&self, player_id: PlayerId) -> Option<GameSnapshot> {
        let you = self.player(player_id)?;
        let opponent = if self.host.id == player_id {
            self.guest.as_ref()
        } else {
            Some(&self.host)
        };
        Some(GameSnapshot {
            version: self.version,
            status: self.status,
            config: self.config.clone(),
            time_remaining_secs: self.time_remaining_secs(),
            you: you.snapshot(&self.config),
            opponent: opponent.map(PlayerState::opponent_snapshot),
        })
    }
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
    use crate::protocol::VetoStrictness;
    use uuid::Uuid;

    fn fleet() -> Vec<ShipPlacement> {
        FLEET_SIZES
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

    /// Host + guest, both fleets placed, combat running.
    fn combat_game(config: GameConfig) -> (GameState, PlayerId, PlayerId) {
        let host = Uuid::from_u128(1);
        let guest = Uuid::from_u128(2);
        let mut game = GameState::new(Uuid::new_v4(), host, "host".into(), config);
        game.add_guest(guest, "guest".into()).unwrap();
        game.place_fleet(host, &fleet()).unwrap();
        let report = game.place_fleet(guest, &fleet()).unwrap();
        assert!(report.combat_started);
        (game, host, guest)
    }

    #[test]
    fn heat_accumulates_and_locks_at_threshold() {
        let (mut game, host, _) = combat_game(GameConfig::default());

        // Six shots into empty water on the right half: no lock yet.
        for i in 0..6 {
            let report = game.fire(host, 5 + (i % 5), 5 + (i / 5)).unwrap();
            assert!(!report.shooter_locked, "shot {i} must not lock");
        }
        assert_eq!(game.player(host).unwrap().heat(), 6);

        // The seventh crosses the default threshold.
        let report = game.fire(host, 9, 9).unwrap();
        assert!(report.shooter_locked);
        assert!(game.player(host).unwrap().weapons_locked());

        // Firing while locked is rejected.
        let err = game.fire(host, 8, 9).unwrap_err();
        assert!(matches!(err, SessionError::WeaponsLocked { .. }));
    }

    #[test]
    fn repeat_shots_add_no_heat() {
        let (mut game, host, _) = combat_game(GameConfig::default());
        game.fire(host, 9, 9).unwrap();
        let report = game.fire(host, 9, 9).unwrap();
        assert_eq!(report.outcome, ShotOutcome::Repeat);
        assert_eq!(game.player(host).unwrap().heat(), 1);
    }

    #[test]
    fn solve_unlocks_and_resets_heat() {
        let config = GameConfig::default().with_heat_threshold(1);
        let (mut game, host, _) = combat_game(config);
        game.fire(host, 9, 9).unwrap();
        assert!(game.player(host).unwrap().weapons_locked());

        game.apply_accepted_solve(host).unwrap();
        let player = game.player(host).unwrap();
        assert!(!player.weapons_locked());
        assert_eq!(player.heat(), 0);
        assert_eq!(player.stats().problems_solved, 1);
        assert!(game.fire(host, 8, 9).is_ok());
    }

    #[test]
    fn fleet_composition_is_enforced() {
        let host = Uuid::from_u128(1);
        let mut game = GameState::new(Uuid::new_v4(), host, "host".into(), GameConfig::default());
        game.add_guest(Uuid::from_u128(2), "guest".into()).unwrap();

        let mut wrong = fleet();
        wrong.pop();
        let err = game.place_fleet(host, &wrong).unwrap_err();
        assert!(matches!(err, SessionError::InvalidFleet(_)));
        assert!(!game.player(host).unwrap().ships_placed());
    }

    #[test]
    fn overlapping_placement_is_rejected() {
        let host = Uuid::from_u128(1);
        let mut game = GameState::new(Uuid::new_v4(), host, "host".into(), GameConfig::default());
        game.add_guest(Uuid::from_u128(2), "guest".into()).unwrap();

        let mut ships = fleet();
        ships[1].y = 0; // collides with the carrier on row 0
        let err = game.place_fleet(host, &ships).unwrap_err();
        assert!(matches!(err, SessionError::InvalidPlacement(_)));
    }

    #[test]
    fn out_of_bounds_placement_is_rejected() {
        let host = Uuid::from_u128(1);
        let mut game = GameState::new(Uuid::new_v4(), host, "host".into(), GameConfig::default());
        game.add_guest(Uuid::from_u128(2), "guest".into()).unwrap();

        let mut ships = fleet();
        ships[0].x = 6; // size-5 ship would end at x=11
        let err = game.place_fleet(host, &ships).unwrap_err();
        assert!(matches!(err, SessionError::InvalidPlacement(_)));
    }

    #[test]
    fn placement_is_rejected_once_combat_started() {
        let (mut game, host, _) = combat_game(GameConfig::default());
        let version = game.version();
        let err = game.place_fleet(host, &fleet()).unwrap_err();
        assert!(matches!(err, SessionError::PlacementClosed));
        assert_eq!(game.version(), version);
    }

    #[test]
    fn replacing_fleet_before_opponent_ready_is_acknowledged() {
        let host = Uuid::from_u128(1);
        let mut game = GameState::new(Uuid::new_v4(), host, "host".into(), GameConfig::default());
        game.add_guest(Uuid::from_u128(2), "guest".into()).unwrap();
        game.place_fleet(host, &fleet()).unwrap();

        let report = game.place_fleet(host, &fleet()).unwrap();
        assert!(report.already_placed);
        assert!(!report.combat_started);
    }

    #[test]
    fn sinking_every_ship_finishes_the_game() {
        let config = GameConfig::default().with_heat_threshold(100);
        let (mut game, host, _) = combat_game(config);

        let mut over = None;
        for (row, &size) in FLEET_SIZES.iter().enumerate() {
            for x in 0..size as usize {
                let report = game.fire(host, x, row).unwrap();
                assert_eq!(report.outcome, ShotOutcome::Hit);
                if x + 1 == size as usize {
                    assert!(report.sunk, "last cell of row {row} must sink the ship");
                }
                over = report.game_over;
            }
        }
        let over = over.expect("sinking the last ship ends the game");
        assert_eq!(over.winner_id, Some(host));
        assert_eq!(over.reason, GameOverReason::AllShipsSunk);
        assert!(game.is_finished());

        let err = game.fire(host, 9, 9).unwrap_err();
        assert!(matches!(err, SessionError::GameEnded));
    }

    #[test]
    fn tiebreak_prefers_ships_then_hits_then_solves() {
        let config = GameConfig::default().with_heat_threshold(100);
        let (mut game, host, guest) = combat_game(config);

        // Host sinks the guest's destroyer: more guest ships down.
        game.fire(host, 0, 4).unwrap();
        game.fire(host, 1, 4).unwrap();
        assert_eq!(game.determine_winner(), TiebreakResult::HostWins);

        // Guest evens the score by sinking the host's destroyer, and pulls
        // ahead on cells hit with one extra strike.
        game.fire(guest, 0, 4).unwrap();
        game.fire(guest, 1, 4).unwrap();
        game.fire(guest, 0, 0).unwrap();
        assert_eq!(game.determine_winner(), TiebreakResult::GuestWins);

        // Host matches the hit count: tie falls through to solves.
        game.fire(host, 0, 0).unwrap();
        assert_eq!(game.determine_winner(), TiebreakResult::SuddenDeath);

        game.apply_accepted_solve(host).unwrap();
        assert_eq!(game.determine_winner(), TiebreakResult::HostWins);
    }

    #[test]
    fn snapshot_masks_opponent_ships() {
        let (mut game, host, guest) = combat_game(GameConfig::default());
        game.fire(host, 0, 0).unwrap(); // hit on the guest's carrier
        game.fire(host, 9, 9).unwrap(); // miss

        let snapshot = game.snapshot_for(host).unwrap();
        let opponent = snapshot.opponent.expect("guest is present");
        assert_eq!(opponent.player_id, guest);
        assert_eq!(opponent.grid[0][0], CellState::Hit);
        assert_eq!(opponent.grid[9][9], CellState::Miss);
        // The rest of the carrier must read as empty water.
        assert_eq!(opponent.grid[0][1], CellState::Empty);

        // The player's own grid hides nothing.
        assert_eq!(snapshot.you.grid[0][0], CellState::Ship);
        assert_eq!(snapshot.you.ships.len(), FLEET_SIZES.len());
    }

    #[test]
    fn snapshot_for_stranger_is_none() {
        let (game, _, _) = combat_game(GameConfig::default());
        assert!(game.snapshot_for(Uuid::from_u128(99)).is_none());
    }

    #[test]
    fn version_bumps_on_every_mutation() {
        let host = Uuid::from_u128(1);
        let mut game = GameState::new(Uuid::new_v4(), host, "host".into(), GameConfig::default());
        let v0 = game.version();
        game.add_guest(Uuid::from_u128(2), "guest".into()).unwrap();
        let v1 = game.version();
        assert!(v1 > v0);
        game.place_fleet(host, &fleet()).unwrap();
        assert!(game.version() > v1);
    }

    #[test]
    fn veto_requires_locked_weapons_and_respects_budget() {
        let config = GameConfig::default().with_heat_threshold(1);
        let (mut game, host, _) = combat_game(config);

        let err = game.start_veto(host).unwrap_err();
        assert!(matches!(err, SessionError::VetoNotAvailable));

        game.fire(host, 9, 9).unwrap(); // locks immediately at threshold 1
        let duration = game.start_veto(host).unwrap();
        assert_eq!(duration, VetoStrictness::Medium.penalties()[0]);

        // Solving is blocked while the penalty timer runs.
        let err = game
            .begin_verification(host, Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, SessionError::VetoActive));
    }

    #[test]
    fn verification_cooldown_is_enforced() {
        let (mut game, host, _) = combat_game(GameConfig::default());
        let handle = game
            .begin_verification(host, Duration::from_secs(10))
            .unwrap();
        assert_eq!(handle, "host");

        let err = game
            .begin_verification(host, Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, SessionError::VerificationCooldown { .. }));
    }
}
