//! Authoritative game state and round results

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::signaling::MAX_PLAYERS;

use super::grid::Cell;
use super::snake::Snake;

/// Round state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Idle,
    Active,
    Ended,
}

/// Everything a renderer needs to draw one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub apple: Cell,
    pub snakes: [Snake; MAX_PLAYERS],
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            apple: Cell::new(5, 5),
            snakes: Default::default(),
        }
    }
}

impl GameState {
    /// Every cell covered by a snake body
    pub fn occupied(&self) -> HashSet<Cell> {
        self.snakes
            .iter()
            .flat_map(|s| s.body.iter().copied())
            .collect()
    }

    /// Occupied cells ignoring one slot's own body
    pub fn occupied_except(&self, slot: usize) -> HashSet<Cell> {
        self.snakes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != slot)
            .flat_map(|(_, s)| s.body.iter().copied())
            .collect()
    }
}

/// Final standings of a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    /// Final score per slot, `None` for slots that were not in the round
    pub scores: [Option<u32>; MAX_PLAYERS],
    /// Best score among the ranked slots
    pub max_score: Option<u32>,
    /// Slots sharing that score
    pub winners: Vec<usize>,
}

impl RoundResult {
    /// Survivors are ranked when there are any; otherwise every participant is.
    /// `alive[i]` marks slots still alive at the end of the round.
    pub fn compute(scores: [Option<u32>; MAX_PLAYERS], alive: [bool; MAX_PLAYERS]) -> Self {
        let survivors: Vec<usize> = (0..MAX_PLAYERS)
            .filter(|&i| scores[i].is_some() && alive[i])
            .collect();
        let ranked: Vec<usize> = if survivors.is_empty() {
            (0..MAX_PLAYERS).filter(|&i| scores[i].is_some()).collect()
        } else {
            survivors
        };

        let max_score = ranked.iter().filter_map(|&i| scores[i]).max();
        let winners = ranked
            .into_iter()
            .filter(|&i| max_score.is_some() && scores[i] == max_score)
            .collect();

        Self {
            scores,
            max_score,
            winners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sole_survivor_wins_even_with_lower_score() {
        let result = RoundResult::compute([Some(1), Some(5), None, None], [true, false, false, false]);
        assert_eq!(result.winners, vec![0]);
        assert_eq!(result.max_score, Some(1));
    }

    #[test]
    fn simultaneous_wipeout_ranks_everyone_with_ties() {
        let result = RoundResult::compute(
            [Some(3), Some(3), Some(1), None],
            [false, false, false, false],
        );
        assert_eq!(result.winners, vec![0, 1]);
        assert_eq!(result.max_score, Some(3));
    }

    #[test]
    fn empty_round_has_no_winner() {
        let result = RoundResult::compute([None; MAX_PLAYERS], [false; MAX_PLAYERS]);
        assert!(result.winners.is_empty());
        assert_eq!(result.max_score, None);
    }
}
