//! Per-slot skills: shield, ghost, teleport and grow

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::grid::{Cell, Direction, Grid};
use super::snake::Snake;

/// Skill variant, fixed by slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillKind {
    /// Survive one otherwise fatal collision
    Shield,
    /// Pass through bodies and heads for a while
    Ghost,
    /// Jump to a fresh free placement of the same length
    Teleport,
    /// Append cells to the tail at once
    Grow,
}

impl SkillKind {
    pub fn for_slot(slot: usize) -> Self {
        match slot {
            0 => Self::Shield,
            1 => Self::Ghost,
            2 => Self::Teleport,
            _ => Self::Grow,
        }
    }
}

/// Skill counters for one slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkillState {
    /// Ticks until the skill can be used again
    pub cooldown: u32,
    /// Un-consumed shield
    pub shield: bool,
    /// Ticks of ghost effect left
    pub ghost_ticks: u32,
    /// Ticks left on the "just activated" indicator
    pub flash_ticks: u32,
}

impl SkillState {
    /// Tick step 1: count everything down, floored at zero
    pub fn decrement(&mut self) {
        self.cooldown = self.cooldown.saturating_sub(1);
        self.ghost_ticks = self.ghost_ticks.saturating_sub(1);
        self.flash_ticks = self.flash_ticks.saturating_sub(1);
    }

    pub fn is_ghost(&self) -> bool {
        self.ghost_ticks > 0
    }

    pub fn is_ready(&self) -> bool {
        self.cooldown == 0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Extend `snake` by up to `cells` past its tail.
///
/// The body keeps trailing in the direction it already runs; when that cell
/// is taken the other neighbours of the tail are tried in a fixed order.
/// Returns how many cells were appended.
pub fn grow_tail(grid: &Grid, snake: &mut Snake, occupied: &HashSet<Cell>, cells: usize) -> usize {
    let mut grown = 0;
    for _ in 0..cells {
        let Some(tail) = snake.tail() else {
            break;
        };
        let trailing = match snake.body.len() {
            0 | 1 => snake.dir.opposite(),
            n => grid
                .direction_between(snake.body[n - 2], tail)
                .unwrap_or_else(|| snake.dir.opposite()),
        };

        let is_free = |cell: &Cell| !occupied.contains(cell) && !snake.occupies(*cell);
        let next = std::iter::once(trailing)
            .chain(Direction::ALL.into_iter().filter(|d| *d != trailing))
            .map(|dir| grid.step(tail, dir))
            .find(is_free);

        match next {
            Some(cell) => {
                snake.body.push_back(cell);
                grown += 1;
            }
            None => break,
        }
    }
    grown
}
