//! Fixed-interval tick driving

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use super::engine::{SimulationEngine, TickOutcome};

/// Whether the driver should keep ticking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Something advanced once per fixed step
pub trait TickTarget {
    fn on_tick(&mut self) -> TickControl;
}

impl TickTarget for SimulationEngine {
    fn on_tick(&mut self) -> TickControl {
        match self.tick() {
            TickOutcome::Running { .. } => TickControl::Continue,
            TickOutcome::Idle | TickOutcome::Ended(_) => TickControl::Stop,
        }
    }
}

/// Tick `target` every `period` until it asks to stop. Each tick completes
/// before the next one is awaited. Returns the number of ticks run.
pub async fn run_fixed_interval<T: TickTarget>(target: &mut T, period: Duration) -> u64 {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    let mut ticks = 0;
    loop {
        ticker.tick().await;
        ticks += 1;
        if target.on_tick() == TickControl::Stop {
            break;
        }
    }
    ticks
}

/// Synchronous driver: at most `max` ticks, stopping early on request
pub fn drive_ticks<T: TickTarget>(target: &mut T, max: usize) -> usize {
    for n in 1..=max {
        if target.on_tick() == TickControl::Stop {
            return n;
        }
    }
    max
}
