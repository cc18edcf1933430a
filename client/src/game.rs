//! Local game state machine for a whack-a-fraudster session
//!
//! The machine is synchronous and event-driven: timer expiries and tile
//! clicks come in as `GameEvent`s, and every transition returns the list of
//! `GameAction`s the async driver must carry out (arm or cancel timers,
//! share state with the session relay, report the final score). Keeping the
//! clock outside the machine makes every rule testable without a runtime.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    level_threshold, GridSnapshot, TileEntity, BASE_GRID_SIZE, CUSTOMER_POINTS, FRAUDSTER_POINTS,
    GRID_GROWTH, MISS_TIMEOUT_MS, SESSION_LIMIT_MS, SPAWN_LIFETIME_MS, SPAWN_LIFETIME_STEP_MS,
    SUPER_LIFETIME_MS, SUPER_MAX_DELAY_MS, SUPER_MIN_DELAY_MS, SUPER_POINTS,
    SUPER_TARGET_MAX_LEVEL,
};
use std::time::Duration;

/// Lifecycle of one game round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing,
    Ended,
}

/// Correct-fraudster, wrong-customer and super-fraudster click counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score {
    pub fraudsters: u32,
    pub customers: u32,
    pub supers: u32,
}

impl Score {
    pub fn points(&self) -> i64 {
        self.fraudsters as i64 * FRAUDSTER_POINTS
            + self.customers as i64 * CUSTOMER_POINTS
            + self.supers as i64 * SUPER_POINTS
    }
}

/// Final result reported when a round ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSummary {
    pub score: Score,
    pub points: i64,
    pub caught_super: bool,
}

/// Inputs to the state machine: player actions and expired timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    StartRequested,
    EndRequested,
    CloseRequested,
    TileClicked(usize),
    EntityExpired { tile: usize, kind: TileEntity },
    SuperDue,
    MissTimeout,
    SessionTimeout,
}

/// Effects the driver must apply after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum GameAction {
    /// Drop all pending entity-expiry timers; the board they referred to
    /// is gone.
    ExpiryTimersCancelled,
    EntitySpawned {
        tile: usize,
        kind: TileEntity,
        lifetime: Duration,
    },
    /// Board was rebuilt; share the snapshot with the session.
    GridRebuilt(GridSnapshot),
    SuperScheduled {
        delay: Duration,
    },
    SessionTimerArmed {
        limit: Duration,
    },
    /// Replaces any previously armed miss timer.
    MissTimerArmed {
        delay: Duration,
    },
    /// A click landed on an occupied tile; share it with the session.
    TileCleared {
        tile: usize,
        kind: TileEntity,
    },
    ScoreChanged {
        score: Score,
        points: i64,
    },
    LevelAdvanced {
        level: u32,
        grid_size: usize,
    },
    AllTimersCancelled,
    Ended {
        summary: GameSummary,
    },
}

/// The game state machine. Tracks the grid, score, level and the
/// super-fraudster schedule; owns the randomness for tile placement.
pub struct GameState {
    phase: Phase,
    grid: Vec<Option<TileEntity>>,
    grid_size: usize,
    score: Score,
    level: u32,
    spawn_lifetime: Duration,
    /// Level at which the super fraudster appears, drawn at game start.
    super_target: u32,
    /// True from the moment the super is scheduled until it is clicked or
    /// expires; level-ups are blocked while it is outstanding.
    super_pending: bool,
    rng: StdRng,
}

impl GameState {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic construction for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            phase: Phase::Idle,
            grid: Vec::new(),
            grid_size: 0,
            score: Score::default(),
            level: 1,
            spawn_lifetime: Duration::from_millis(SPAWN_LIFETIME_MS),
            super_target: 1,
            super_pending: false,
            rng,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            size: self.grid_size,
            tiles: self.grid.clone(),
        }
    }

    /// Applies one event and returns the actions the driver must take.
    /// Events that do not fit the current phase are ignored.
    pub fn apply(&mut self, event: GameEvent) -> Vec<GameAction> {
        match (self.phase, event) {
            (Phase::Idle | Phase::Ended, GameEvent::StartRequested) => self.start(),
            (Phase::Playing, GameEvent::EndRequested) => self.end(),
            (_, GameEvent::CloseRequested) => {
                self.phase = Phase::Idle;
                vec![GameAction::AllTimersCancelled]
            }
            (Phase::Playing, GameEvent::TileClicked(tile)) => self.click(tile),
            (Phase::Playing, GameEvent::EntityExpired { tile, kind }) => self.expire(tile, kind),
            (Phase::Playing, GameEvent::SuperDue) => self.spawn_super(),
            (Phase::Playing, GameEvent::MissTimeout | GameEvent::SessionTimeout) => self.end(),
            _ => Vec::new(),
        }
    }

    fn start(&mut self) -> Vec<GameAction> {
        self.phase = Phase::Playing;
        self.score = Score::default();
        self.level = 1;
        self.spawn_lifetime = Duration::from_millis(SPAWN_LIFETIME_MS);
        self.super_target = self.rng.gen_range(1..=SUPER_TARGET_MAX_LEVEL);
        self.super_pending = false;
        debug!("Game started; super fraudster due at level {}", self.super_target);

        let mut actions = vec![GameAction::SessionTimerArmed {
            limit: Duration::from_millis(SESSION_LIMIT_MS),
        }];
        actions.extend(self.rebuild_grid(BASE_GRID_SIZE));
        actions.extend(self.check_super());
        actions
    }

    fn end(&mut self) -> Vec<GameAction> {
        self.phase = Phase::Ended;
        let summary = GameSummary {
            score: self.score,
            points: self.score.points(),
            caught_super: self.score.supers > 0,
        };
        vec![
            GameAction::AllTimersCancelled,
            GameAction::Ended { summary },
        ]
    }

    /// Clears the board to the given size and seeds it with one fraudster
    /// and two customers. The centre tile stays reserved for the logo.
    fn rebuild_grid(&mut self, size: usize) -> Vec<GameAction> {
        self.grid_size = size;
        self.grid = vec![None; size * size];

        let mut actions = vec![GameAction::ExpiryTimersCancelled];
        actions.extend(self.spawn(TileEntity::Fraudster));
        actions.extend(self.spawn(TileEntity::Customer));
        actions.extend(self.spawn(TileEntity::Customer));
        actions.push(GameAction::GridRebuilt(self.snapshot()));
        actions
    }

    /// Places an entity on a random unoccupied tile. Supers outlive their
    /// own stricter timeout; everything else lives for the current spawn
    /// lifetime.
    fn spawn(&mut self, kind: TileEntity) -> Option<GameAction> {
        let tile = self.random_free_tile()?;
        self.grid[tile] = Some(kind);

        let lifetime = match kind {
            TileEntity::SuperFraudster => Duration::from_millis(SUPER_LIFETIME_MS),
            _ => self.spawn_lifetime,
        };
        Some(GameAction::EntitySpawned {
            tile,
            kind,
            lifetime,
        })
    }

    fn random_free_tile(&mut self) -> Option<usize> {
        let logo = self.grid.len() / 2;
        let free: Vec<usize> = (0..self.grid.len())
            .filter(|&i| i != logo && self.grid[i].is_none())
            .collect();
        if free.is_empty() {
            return None;
        }
        Some(free[self.rng.gen_range(0..free.len())])
    }

    /// Arms the super-fraudster appearance when the current level is the
    /// one it was scheduled for.
    fn check_super(&mut self) -> Option<GameAction> {
        if self.level != self.super_target {
            return None;
        }
        self.super_pending = true;
        let delay =
            Duration::from_millis(self.rng.gen_range(SUPER_MIN_DELAY_MS..=SUPER_MAX_DELAY_MS));
        debug!("Super fraudster appears in {:?}", delay);
        Some(GameAction::SuperScheduled { delay })
    }

    fn spawn_super(&mut self) -> Vec<GameAction> {
        match self.spawn(TileEntity::SuperFraudster) {
            Some(action) => vec![action],
            None => {
                // Board is full; the opportunity passes unclaimed.
                self.super_pending = false;
                Vec::new()
            }
        }
    }

    fn click(&mut self, tile: usize) -> Vec<GameAction> {
        let kind = match self.grid.get(tile).copied().flatten() {
            Some(kind) => kind,
            None => return Vec::new(),
        };
        self.grid[tile] = None;

        match kind {
            TileEntity::Fraudster => self.score.fraudsters += 1,
            TileEntity::Customer => self.score.customers += 1,
            TileEntity::SuperFraudster => {
                self.score.supers += 1;
                self.super_pending = false;
            }
        }

        let mut actions = vec![GameAction::TileCleared { tile, kind }];
        actions.extend(self.score_updated());
        actions
    }

    /// Entity lifetime ran out. The tile may already be empty if the entity
    /// was clicked; a replacement of the same kind still spawns so the
    /// board population stays constant. An expired super never returns.
    fn expire(&mut self, tile: usize, kind: TileEntity) -> Vec<GameAction> {
        if self.grid.get(tile).copied().flatten() == Some(kind) {
            self.grid[tile] = None;
        }

        match kind {
            TileEntity::SuperFraudster => {
                self.super_pending = false;
                Vec::new()
            }
            _ => self.spawn(kind).into_iter().collect(),
        }
    }

    fn score_updated(&mut self) -> Vec<GameAction> {
        let points = self.score.points();
        let mut actions = vec![GameAction::ScoreChanged {
            score: self.score,
            points,
        }];

        if points >= level_threshold(self.grid_size) && !self.super_pending {
            actions.extend(self.level_up());
        }

        actions.push(GameAction::MissTimerArmed {
            delay: Duration::from_millis(MISS_TIMEOUT_MS),
        });
        actions
    }

    fn level_up(&mut self) -> Vec<GameAction> {
        self.level += 1;
        self.spawn_lifetime = self
            .spawn_lifetime
            .saturating_sub(Duration::from_millis(SPAWN_LIFETIME_STEP_MS));
        let size = self.grid_size + GRID_GROWTH;
        debug!("Level {} reached; grid grows to {}x{}", self.level, size, size);

        let mut actions = vec![GameAction::LevelAdvanced {
            level: self.level,
            grid_size: size,
        }];
        actions.extend(self.rebuild_grid(size));
        actions.extend(self.check_super());
        actions
    }

    /// Forces the super-fraudster level so tests can steer the schedule.
    #[cfg(test)]
    pub fn force_super_target(&mut self, level: u32) {
        self.super_target = level;
        self.super_pending = false;
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}
