//! Host-side fan-out of snapshots to every open link

use tracing::{trace, warn};

use crate::game::engine::SimulationEngine;
use crate::game::snapshot::{SnapshotBuilder, SnapshotStats};
use crate::game::state::RoundResult;
use crate::signaling::MAX_PLAYERS;

use super::link::LinkFactory;
use super::orchestrator::ConnectionOrchestrator;

/// Serializes each host message once and sends the same text to every
/// `Connected` link. Links still negotiating get nothing and no catch-up.
#[derive(Debug, Default)]
pub struct Broadcaster {
    builder: SnapshotBuilder,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &SnapshotStats {
        self.builder.stats()
    }

    pub fn state<F: LinkFactory>(
        &mut self,
        engine: &SimulationEngine,
        links: &mut ConnectionOrchestrator<F>,
    ) -> usize {
        match self.builder.state(engine) {
            Ok(text) => fan_out(links, &text, "state"),
            Err(e) => {
                warn!(error = %e, "Failed to encode state snapshot");
                0
            }
        }
    }

    pub fn round_start<F: LinkFactory>(
        &mut self,
        engine: &SimulationEngine,
        links: &mut ConnectionOrchestrator<F>,
    ) -> usize {
        match self.builder.round_start(engine) {
            Ok(text) => fan_out(links, &text, "round_start"),
            Err(e) => {
                warn!(error = %e, "Failed to encode round start");
                0
            }
        }
    }

    pub fn game_over<F: LinkFactory>(
        &mut self,
        result: &RoundResult,
        wins: [u32; MAX_PLAYERS],
        links: &mut ConnectionOrchestrator<F>,
    ) -> usize {
        match self.builder.game_over(result, wins) {
            Ok(text) => fan_out(links, &text, "game_over"),
            Err(e) => {
                warn!(error = %e, "Failed to encode game over");
                0
            }
        }
    }
}

fn fan_out<F: LinkFactory>(
    links: &mut ConnectionOrchestrator<F>,
    text: &str,
    kind: &'static str,
) -> usize {
    let sent = links.send_all(text);
    trace!(kind, sent, bytes = text.len(), "Broadcast");
    sent
}
