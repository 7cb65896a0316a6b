//! Game simulation modules

pub mod collision;
pub mod engine;
pub mod grid;
pub mod rng;
pub mod scheduler;
pub mod skills;
pub mod snake;
pub mod snapshot;
pub mod state;

pub use engine::{SimulationEngine, TickOutcome};
pub use grid::{Cell, Direction, Grid};
pub use scheduler::{drive_ticks, run_fixed_interval, TickControl, TickTarget};
pub use skills::{SkillKind, SkillState};
pub use snake::Snake;
pub use snapshot::{SnapshotBuilder, SnapshotStats};
pub use state::{GameState, RoundPhase, RoundResult};
