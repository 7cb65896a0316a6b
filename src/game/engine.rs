//! Host-authoritative simulation: round state machine and the tick step

use tracing::{debug, info};

use crate::config::SimConfig;
use crate::error::StateInconsistency;
use crate::signaling::MAX_PLAYERS;

use super::collision::{self, Candidates};
use super::grid::{Cell, Direction, Grid};
use super::rng::GameRng;
use super::skills::{grow_tail, SkillKind, SkillState};
use super::snake::{sample_placement, spawn_layout, Placement, Snake, SPAWN_LENGTH};
use super::state::{GameState, RoundPhase, RoundResult};

/// Slots needed to start a round
pub const MIN_PLAYERS: usize = 2;

/// What a call to [`SimulationEngine::tick`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No round running, nothing simulated
    Idle,
    /// Round continues
    Running { apple_eaten: bool, deaths: Vec<usize> },
    /// Round finished on this tick
    Ended(RoundResult),
}

/// The authoritative simulation (owned by the host's tick task)
pub struct SimulationEngine {
    config: SimConfig,
    grid: Grid,
    phase: RoundPhase,
    tick: u64,
    state: GameState,
    skills: [SkillState; MAX_PLAYERS],
    /// Slot occupied by a room member
    active: [bool; MAX_PLAYERS],
    /// Slot takes part in the current round
    in_round: [bool; MAX_PLAYERS],
    /// Active slot whose spawn failed; retried on membership changes
    pending_spawn: [bool; MAX_PLAYERS],
    /// Latest direction per slot, consumed by the next tick
    queued: [Option<Direction>; MAX_PLAYERS],
    /// Rounds won, per slot, since the slot became active
    wins: [u32; MAX_PLAYERS],
    last_result: Option<RoundResult>,
    rng: GameRng,
}

impl SimulationEngine {
    pub fn new(config: SimConfig) -> Self {
        let grid = Grid::new(config.width, config.height);
        let rng = GameRng::new(config.seed);
        Self {
            config,
            grid,
            phase: RoundPhase::Idle,
            tick: 0,
            state: GameState::default(),
            skills: Default::default(),
            active: [false; MAX_PLAYERS],
            in_round: [false; MAX_PLAYERS],
            pending_spawn: [false; MAX_PLAYERS],
            queued: [None; MAX_PLAYERS],
            wins: [0; MAX_PLAYERS],
            last_result: None,
            rng,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn skills(&self) -> &[SkillState; MAX_PLAYERS] {
        &self.skills
    }

    pub fn wins(&self) -> [u32; MAX_PLAYERS] {
        self.wins
    }

    pub fn last_result(&self) -> Option<&RoundResult> {
        self.last_result.as_ref()
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.active.get(slot).copied().unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    /// Active slots whose snake is alive
    pub fn alive_active_count(&self) -> usize {
        (0..MAX_PLAYERS)
            .filter(|&i| self.active[i] && self.state.snakes[i].alive)
            .count()
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// A member took `slot`; spawn its snake if there is room
    pub fn activate_slot(&mut self, slot: usize) -> Result<(), StateInconsistency> {
        check_slot(slot)?;
        if !self.active[slot] {
            self.active[slot] = true;
            self.wins[slot] = 0;
            self.skills[slot].reset();
            info!(slot, phase = ?self.phase, "Slot activated");
        }
        if self.state.snakes[slot].alive {
            return Ok(());
        }
        self.spawn(slot)
    }

    /// The member in `slot` left or its link closed. Idempotent.
    pub fn deactivate_slot(&mut self, slot: usize) -> Result<(), StateInconsistency> {
        check_slot(slot)?;
        if !self.active[slot] {
            return Err(StateInconsistency::InactiveSlot(slot));
        }
        self.active[slot] = false;
        self.in_round[slot] = false;
        self.pending_spawn[slot] = false;
        self.queued[slot] = None;
        self.wins[slot] = 0;
        self.skills[slot].reset();
        self.state.snakes[slot] = Snake::empty();
        info!(slot, phase = ?self.phase, "Slot deactivated");
        Ok(())
    }

    /// Retry spawns that failed earlier; returns the slots that now have a snake
    pub fn retry_pending_spawns(&mut self) -> Vec<usize> {
        let pending: Vec<usize> = (0..MAX_PLAYERS).filter(|&i| self.pending_spawn[i]).collect();
        pending
            .into_iter()
            .filter(|&slot| self.spawn(slot).is_ok())
            .collect()
    }

    fn spawn(&mut self, slot: usize) -> Result<(), StateInconsistency> {
        let occupied = self.state.occupied_except(slot);
        let (head, dir) = spawn_layout(slot);
        let preferred = Placement::straight(&self.grid, head, dir, SPAWN_LENGTH);

        let placement = if preferred.is_free(&occupied) {
            Some(preferred)
        } else {
            sample_placement(
                &self.grid,
                &mut self.rng,
                &occupied,
                SPAWN_LENGTH,
                self.config.max_placement_attempts,
            )
        };

        let Some(placement) = placement else {
            self.pending_spawn[slot] = true;
            debug!(slot, "No free spawn placement, slot left pending");
            return Err(StateInconsistency::NoPlacement(slot));
        };

        let snake = &mut self.state.snakes[slot];
        *snake = Snake::empty();
        snake.relocate(placement);
        snake.alive = true;
        self.pending_spawn[slot] = false;
        if self.phase == RoundPhase::Active {
            self.in_round[slot] = true;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Round control
    // ------------------------------------------------------------------

    /// Idle/Ended -> Active. Clears skills, scores and round counters.
    pub fn start_round(&mut self) -> Result<(), StateInconsistency> {
        if self.phase == RoundPhase::Active {
            return Err(StateInconsistency::RoundInProgress);
        }
        let have = self.active_count();
        if have < MIN_PLAYERS {
            return Err(StateInconsistency::NotEnoughPlayers {
                needed: MIN_PLAYERS,
                have,
            });
        }

        // Ended -> Idle happens implicitly here
        self.phase = RoundPhase::Idle;
        self.tick = 0;
        self.last_result = None;
        self.queued = [None; MAX_PLAYERS];
        self.in_round = [false; MAX_PLAYERS];
        for skill in &mut self.skills {
            skill.reset();
        }
        self.state = GameState::default();

        for slot in 0..MAX_PLAYERS {
            if self.active[slot] {
                // A failed spawn just leaves the slot pending
                let _ = self.spawn(slot);
                self.in_round[slot] = self.state.snakes[slot].alive;
            }
        }

        self.relocate_apple();
        self.phase = RoundPhase::Active;

        info!(
            players = self.in_round.iter().filter(|p| **p).count(),
            apple_x = self.state.apple.x,
            apple_y = self.state.apple.y,
            "Round started"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Keep the latest direction for the next tick
    pub fn queue_input(&mut self, slot: usize, dir: Direction) -> Result<(), StateInconsistency> {
        check_slot(slot)?;
        if !self.active[slot] {
            return Err(StateInconsistency::InactiveSlot(slot));
        }
        if !self.state.snakes[slot].alive {
            return Err(StateInconsistency::DeadSnake(slot));
        }
        self.queued[slot] = Some(dir);
        Ok(())
    }

    /// Fire the slot's skill; takes effect for the next tick's collision pass
    pub fn activate_skill(&mut self, slot: usize) -> Result<SkillKind, StateInconsistency> {
        check_slot(slot)?;
        if self.phase != RoundPhase::Active {
            return Err(StateInconsistency::RoundNotActive);
        }
        if !self.active[slot] {
            return Err(StateInconsistency::InactiveSlot(slot));
        }
        if !self.state.snakes[slot].alive {
            return Err(StateInconsistency::DeadSnake(slot));
        }
        if !self.skills[slot].is_ready() {
            return Err(StateInconsistency::OnCooldown {
                slot,
                remaining: self.skills[slot].cooldown,
            });
        }

        let kind = SkillKind::for_slot(slot);
        match kind {
            SkillKind::Shield => self.skills[slot].shield = true,
            SkillKind::Ghost => self.skills[slot].ghost_ticks = self.config.ghost_ticks,
            SkillKind::Teleport => {
                let occupied = self.state.occupied_except(slot);
                let len = self.state.snakes[slot].len().max(1);
                let placement = sample_placement(
                    &self.grid,
                    &mut self.rng,
                    &occupied,
                    len,
                    self.config.max_placement_attempts,
                )
                .ok_or(StateInconsistency::NoPlacement(slot))?;
                self.state.snakes[slot].relocate(placement);
            }
            SkillKind::Grow => {
                let occupied = self.state.occupied_except(slot);
                grow_tail(
                    &self.grid,
                    &mut self.state.snakes[slot],
                    &occupied,
                    self.config.grow_cells,
                );
            }
        }

        let skill = &mut self.skills[slot];
        skill.cooldown = self.config.skill_cooldown_ticks;
        skill.flash_ticks = self.config.flash_ticks;
        debug!(slot, kind = ?kind, tick = self.tick, "Skill activated");
        Ok(kind)
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the simulation by one fixed step
    pub fn tick(&mut self) -> TickOutcome {
        if self.phase != RoundPhase::Active {
            return TickOutcome::Idle;
        }
        self.tick += 1;

        // 1. cooldowns and effect timers
        for skill in &mut self.skills {
            skill.decrement();
        }

        // 2. at most one queued input per slot, reversals rejected
        for slot in 0..MAX_PLAYERS {
            let Some(dir) = self.queued[slot].take() else {
                continue;
            };
            let snake = &mut self.state.snakes[slot];
            if snake.alive && !dir.is_reverse_of(snake.dir) {
                snake.dir = dir;
            }
        }

        // 3. candidate heads on the torus
        let candidates: Candidates = std::array::from_fn(|slot| {
            let snake = &self.state.snakes[slot];
            if !snake.alive {
                return None;
            }
            snake.head().map(|head| self.grid.step(head, snake.dir))
        });

        // 4. collisions against pre-movement bodies
        let marks = collision::resolve(&self.state.snakes, &self.skills, &candidates);

        // 5. movement
        let mut apple_eaten = false;
        let mut deaths = Vec::new();
        for (slot, candidate) in candidates.iter().enumerate() {
            let Some(head) = *candidate else { continue };

            if marks.dies(slot) {
                self.state.snakes[slot].kill();
                self.skills[slot].reset();
                self.queued[slot] = None;
                deaths.push(slot);
                continue;
            }
            if marks.shielded[slot] {
                self.skills[slot].shield = false;
                debug!(slot, tick = self.tick, "Shield consumed");
            }

            let snake = &mut self.state.snakes[slot];
            snake.body.push_front(head);
            if head == self.state.apple {
                snake.score += 1;
                apple_eaten = true;
            } else {
                snake.body.pop_back();
            }
        }

        if !deaths.is_empty() {
            debug!(tick = self.tick, ?deaths, "Snakes died");
        }

        // 6. apple
        if apple_eaten {
            self.relocate_apple();
        }

        // 7. round end
        if self.alive_active_count() <= 1 {
            return TickOutcome::Ended(self.end_round());
        }

        TickOutcome::Running {
            apple_eaten,
            deaths,
        }
    }

    fn end_round(&mut self) -> RoundResult {
        let scores: [Option<u32>; MAX_PLAYERS] = std::array::from_fn(|i| {
            (self.active[i] && self.in_round[i]).then_some(self.state.snakes[i].score)
        });
        let alive: [bool; MAX_PLAYERS] =
            std::array::from_fn(|i| self.active[i] && self.state.snakes[i].alive);

        let result = RoundResult::compute(scores, alive);
        for &slot in &result.winners {
            self.wins[slot] += 1;
        }

        self.phase = RoundPhase::Ended;
        self.last_result = Some(result.clone());
        info!(
            tick = self.tick,
            winners = ?result.winners,
            max_score = ?result.max_score,
            "Round ended"
        );
        result
    }

    /// Uniform free cell by rejection sampling; falls back to scanning the
    /// free cells when the board is nearly full
    fn relocate_apple(&mut self) {
        let occupied = self.state.occupied();
        let attempts = self.grid.cell_count() * 4;
        for _ in 0..attempts {
            let cell = self.rng.cell(&self.grid);
            if !occupied.contains(&cell) {
                self.state.apple = cell;
                return;
            }
        }

        let free: Vec<Cell> = self.grid.cells().filter(|c| !occupied.contains(c)).collect();
        if !free.is_empty() {
            self.state.apple = free[self.rng.below(free.len())];
        }
    }

    #[cfg(test)]
    pub(crate) fn place_snake(&mut self, slot: usize, snake: Snake) {
        self.state.snakes[slot] = snake;
    }

    #[cfg(test)]
    pub(crate) fn place_apple(&mut self, cell: Cell) {
        self.state.apple = cell;
    }
}

fn check_slot(slot: usize) -> Result<(), StateInconsistency> {
    if slot < MAX_PLAYERS {
        Ok(())
    } else {
        Err(StateInconsistency::NoSuchSlot(slot))
    }
}
