//! Error taxonomy shared by the relay, the orchestrator and the host engine.
//!
//! None of these are fatal: protocol errors are dropped, capacity errors are
//! surfaced to the joining user, negotiation errors are logged and state
//! inconsistencies are ignored.

/// Malformed or unexpected message on either channel
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected message `{0}` on this side of the link")]
    Unexpected(&'static str),

    #[error("direction {x},{y} is not a unit vector")]
    InvalidDirection { x: i32, y: i32 },
}

/// Join rejections
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("room is full ({max} players)")]
    RoomFull { max: usize },

    #[error("room id must not be empty")]
    EmptyRoomId,
}

/// Failures while negotiating a peer link
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("no link to peer {0}")]
    UnknownPeer(String),

    #[error("link to {peer} cannot accept {action} while {state}")]
    InvalidState {
        peer: String,
        action: &'static str,
        state: &'static str,
    },

    #[error("link backend error: {0}")]
    Backend(String),

    #[error("bad negotiation payload: {0}")]
    Payload(String),
}

/// Failures sending over an established data channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("data channel is not open")]
    NotOpen,

    #[error("send failed: {0}")]
    Send(String),
}

/// Commands that do not apply to the current game state
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateInconsistency {
    #[error("slot {0} is out of range")]
    NoSuchSlot(usize),

    #[error("slot {0} is not active")]
    InactiveSlot(usize),

    #[error("snake in slot {0} is dead")]
    DeadSnake(usize),

    #[error("no round in progress")]
    RoundNotActive,

    #[error("a round is already running")]
    RoundInProgress,

    #[error("a round needs at least {needed} active slots, have {have}")]
    NotEnoughPlayers { needed: usize, have: usize },

    #[error("skill for slot {slot} is cooling down ({remaining} ticks)")]
    OnCooldown { slot: usize, remaining: u32 },

    #[error("no free placement found for slot {0}")]
    NoPlacement(usize),
}
