//! Deterministic random stream for the host simulation

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::grid::{Cell, Direction, Grid};

/// Counter-based PRNG; the same seed always yields the same sequence
#[derive(Debug, Clone)]
pub struct GameRng {
    inner: ChaCha8Rng,
}

impl GameRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform in `0..n`; `n` must be non-zero
    pub fn below(&mut self, n: usize) -> usize {
        self.inner.gen_range(0..n)
    }

    pub fn cell(&mut self, grid: &Grid) -> Cell {
        let x = self.inner.gen_range(0..grid.width);
        let y = self.inner.gen_range(0..grid.height);
        Cell::new(x, y)
    }

    pub fn direction(&mut self) -> Direction {
        Direction::ALL[self.below(Direction::ALL.len())]
    }
}
