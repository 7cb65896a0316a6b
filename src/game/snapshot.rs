//! Snapshot building for the peer links

use tracing::debug;

use crate::error::ProtocolError;
use crate::peer::protocol::{PeerMsg, SkillMeta};

use super::engine::SimulationEngine;
use super::state::RoundResult;

/// Encodes host messages once per broadcast and keeps running stats
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    /// Per-tick state snapshot
    pub fn state(&mut self, engine: &SimulationEngine) -> Result<String, ProtocolError> {
        let msg = PeerMsg::State {
            state: engine.state().clone(),
            skills: SkillMeta::for_all(engine.skills()),
        };
        self.encode(&msg, engine.alive_active_count())
    }

    /// Snapshot sent when a round starts
    pub fn round_start(&mut self, engine: &SimulationEngine) -> Result<String, ProtocolError> {
        let msg = PeerMsg::RoundStart {
            state: engine.state().clone(),
            skills: SkillMeta::for_all(engine.skills()),
        };
        self.encode(&msg, engine.alive_active_count())
    }

    pub fn game_over(
        &mut self,
        result: &RoundResult,
        wins: [u32; crate::signaling::MAX_PLAYERS],
    ) -> Result<String, ProtocolError> {
        let msg = PeerMsg::GameOver {
            results: result.clone(),
            wins,
        };
        self.encode(&msg, 0)
    }

    fn encode(&mut self, msg: &PeerMsg, alive: usize) -> Result<String, ProtocolError> {
        let text = msg.encode()?;
        self.stats.record(alive, text.len());
        if self.stats.total_snapshots % 100 == 0 {
            debug!(
                snapshots = self.stats.total_snapshots,
                bytes = self.stats.total_bytes,
                avg_alive = self.stats.avg_alive_per_snapshot,
                "Snapshot stats"
            );
        }
        Ok(text)
    }
}

/// Snapshot size stats for debugging
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_alive_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, alive: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_alive_per_snapshot =
            self.avg_alive_per_snapshot * ((n - 1.0) / n) + (alive as f32 / n);
    }
}
