//! Snake bodies, spawn layouts and placement sampling

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::grid::{Cell, Direction, Grid};
use super::rng::GameRng;

/// Cells in a freshly spawned snake
pub const SPAWN_LENGTH: usize = 3;

/// A snake; an empty body with `alive == false` stands for an unused slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snake {
    /// Head first
    pub body: VecDeque<Cell>,
    pub dir: Direction,
    pub alive: bool,
    pub score: u32,
}

impl Default for Snake {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snake {
    pub fn empty() -> Self {
        Self {
            body: VecDeque::new(),
            dir: Direction::Right,
            alive: false,
            score: 0,
        }
    }

    /// Straight snake with its head at `head`, body trailing behind `dir`
    pub fn straight(grid: &Grid, head: Cell, dir: Direction, len: usize) -> Self {
        Self {
            body: straight_body(grid, head, dir, len),
            dir,
            alive: true,
            score: 0,
        }
    }

    pub fn head(&self) -> Option<Cell> {
        self.body.front().copied()
    }

    pub fn tail(&self) -> Option<Cell> {
        self.body.back().copied()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn occupies(&self, cell: Cell) -> bool {
        self.body.contains(&cell)
    }

    /// Body cells except the tail, which moves away this tick
    pub fn body_without_tail(&self) -> impl Iterator<Item = &Cell> {
        let keep = self.body.len().saturating_sub(1);
        self.body.iter().take(keep)
    }

    /// Dead snakes keep their score for the round result
    pub fn kill(&mut self) {
        self.body.clear();
        self.alive = false;
    }

    /// Move the body to a new straight placement, keeping the score
    pub fn relocate(&mut self, placement: Placement) {
        self.body = placement.body;
        self.dir = placement.dir;
    }
}

fn straight_body(grid: &Grid, head: Cell, dir: Direction, len: usize) -> VecDeque<Cell> {
    let behind = dir.opposite();
    let mut body = VecDeque::with_capacity(len);
    let mut cell = grid.wrap(head);
    for _ in 0..len {
        body.push_back(cell);
        cell = grid.step(cell, behind);
    }
    body
}

/// Default layout for each slot on the 30x20 board
pub fn spawn_layout(slot: usize) -> (Cell, Direction) {
    match slot {
        0 => (Cell::new(8, 10), Direction::Right),
        1 => (Cell::new(22, 10), Direction::Left),
        2 => (Cell::new(15, 4), Direction::Down),
        _ => (Cell::new(15, 16), Direction::Up),
    }
}

/// A candidate straight placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub body: VecDeque<Cell>,
    pub dir: Direction,
}

impl Placement {
    pub fn straight(grid: &Grid, head: Cell, dir: Direction, len: usize) -> Self {
        Self {
            body: straight_body(grid, head, dir, len),
            dir,
        }
    }

    /// Cells are distinct and none is taken
    pub fn is_free(&self, occupied: &HashSet<Cell>) -> bool {
        let mut seen = HashSet::with_capacity(self.body.len());
        self.body
            .iter()
            .all(|cell| !occupied.contains(cell) && seen.insert(*cell))
    }
}

/// Rejection-sample a straight placement of `len` cells avoiding `occupied`
pub fn sample_placement(
    grid: &Grid,
    rng: &mut GameRng,
    occupied: &HashSet<Cell>,
    len: usize,
    attempts: u32,
) -> Option<Placement> {
    (0..attempts).find_map(|_| {
        let head = rng.cell(grid);
        let dir = rng.direction();
        let placement = Placement::straight(grid, head, dir, len);
        placement.is_free(occupied).then_some(placement)
    })
}
