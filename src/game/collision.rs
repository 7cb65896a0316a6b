//! Simultaneous-move collision resolution
//!
//! Every check reads the pre-movement bodies and the candidate heads, so the
//! outcome does not depend on slot order.

use std::collections::HashMap;

use crate::signaling::MAX_PLAYERS;

use super::grid::Cell;
use super::skills::SkillState;
use super::snake::Snake;

/// Per-slot verdicts for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionMarks {
    /// Hit something this tick
    pub hit: [bool; MAX_PLAYERS],
    /// Hit something but held a shield
    pub shielded: [bool; MAX_PLAYERS],
}

impl CollisionMarks {
    pub fn dies(&self, slot: usize) -> bool {
        self.hit[slot] && !self.shielded[slot]
    }
}

/// Candidate head of every alive snake; `None` for dead or empty slots
pub type Candidates = [Option<Cell>; MAX_PLAYERS];

/// Run the head-to-head, self, other and shield passes in that order
pub fn resolve(
    snakes: &[Snake; MAX_PLAYERS],
    skills: &[SkillState; MAX_PLAYERS],
    candidates: &Candidates,
) -> CollisionMarks {
    let mut marks = CollisionMarks::default();
    check_head_to_head(skills, candidates, &mut marks);
    check_self(snakes, skills, candidates, &mut marks);
    check_others(snakes, skills, candidates, &mut marks);
    apply_shields(skills, &mut marks);
    marks
}

fn check_head_to_head(
    skills: &[SkillState; MAX_PLAYERS],
    candidates: &Candidates,
    marks: &mut CollisionMarks,
) {
    let mut claims: HashMap<Cell, Vec<usize>> = HashMap::new();
    for (slot, cell) in candidates.iter().enumerate() {
        if let Some(cell) = cell {
            claims.entry(*cell).or_default().push(slot);
        }
    }

    for slots in claims.values().filter(|slots| slots.len() >= 2) {
        for &slot in slots {
            if !skills[slot].is_ghost() {
                marks.hit[slot] = true;
            }
        }
    }
}

fn check_self(
    snakes: &[Snake; MAX_PLAYERS],
    skills: &[SkillState; MAX_PLAYERS],
    candidates: &Candidates,
    marks: &mut CollisionMarks,
) {
    for (slot, candidate) in candidates.iter().enumerate() {
        let Some(head) = candidate else { continue };
        if marks.hit[slot] || skills[slot].is_ghost() {
            continue;
        }
        if snakes[slot].body_without_tail().any(|cell| cell == head) {
            marks.hit[slot] = true;
        }
    }
}

fn check_others(
    snakes: &[Snake; MAX_PLAYERS],
    skills: &[SkillState; MAX_PLAYERS],
    candidates: &Candidates,
    marks: &mut CollisionMarks,
) {
    for (slot, candidate) in candidates.iter().enumerate() {
        let Some(head) = candidate else { continue };
        if marks.hit[slot] || skills[slot].is_ghost() {
            continue;
        }
        // Ghosted snakes stay solid for everybody else
        let hits_other = snakes
            .iter()
            .enumerate()
            .any(|(other, snake)| other != slot && snake.occupies(*head));
        if hits_other {
            marks.hit[slot] = true;
        }
    }
}

fn apply_shields(skills: &[SkillState; MAX_PLAYERS], marks: &mut CollisionMarks) {
    for slot in 0..MAX_PLAYERS {
        if marks.hit[slot] && skills[slot].shield {
            marks.shielded[slot] = true;
        }
    }
}
