//! Peer-link message types (host <-> guest data channel)

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::game::grid::Direction;
use crate::game::skills::{SkillKind, SkillState};
use crate::game::state::{GameState, RoundResult};
use crate::signaling::MAX_PLAYERS;

/// Per-slot skill metadata shipped with every snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMeta {
    pub kind: SkillKind,
    pub cooldown: u32,
    pub shield: bool,
    pub ghost: u32,
    pub flash: u32,
}

impl SkillMeta {
    pub fn from_state(slot: usize, state: &SkillState) -> Self {
        Self {
            kind: SkillKind::for_slot(slot),
            cooldown: state.cooldown,
            shield: state.shield,
            ghost: state.ghost_ticks,
            flash: state.flash_ticks,
        }
    }

    pub fn for_all(states: &[SkillState; MAX_PLAYERS]) -> [SkillMeta; MAX_PLAYERS] {
        std::array::from_fn(|slot| Self::from_state(slot, &states[slot]))
    }
}

/// Messages on the direct link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum PeerMsg {
    // Host -> guest
    RoundStart {
        state: GameState,
        skills: [SkillMeta; MAX_PLAYERS],
    },
    State {
        state: GameState,
        skills: [SkillMeta; MAX_PLAYERS],
    },
    GameOver {
        results: RoundResult,
        wins: [u32; MAX_PLAYERS],
    },

    // Guest -> host
    Input {
        dir: Direction,
    },
    Skill {},
}

impl PeerMsg {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            PeerMsg::RoundStart { .. } => "round_start",
            PeerMsg::State { .. } => "state",
            PeerMsg::GameOver { .. } => "game_over",
            PeerMsg::Input { .. } => "input",
            PeerMsg::Skill {} => "skill",
        }
    }
}
