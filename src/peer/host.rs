//! Host participant: owns the engine, the links to every guest and the tick task

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::error::{ProtocolError, StateInconsistency};
use crate::game::engine::{SimulationEngine, TickOutcome};
use crate::game::grid::Direction;
use crate::game::scheduler::{TickControl, TickTarget};
use crate::game::state::RoundPhase;
use crate::signaling::{ClientId, SignalClientMsg, SignalServerMsg};

use super::broadcast::Broadcaster;
use super::link::{IceCandidate, LinkFactory};
use super::orchestrator::{ConnectionOrchestrator, LinkEvent};
use super::protocol::PeerMsg;

/// The host's own slot
pub const HOST_SLOT: usize = 0;

/// Everything the host task reacts to besides the tick timer
#[derive(Debug)]
pub enum HostEvent {
    /// Message from the relay
    Signal(SignalServerMsg),
    LocalCandidate(ClientId, IceCandidate),
    ChannelOpen(ClientId),
    ChannelClosed(ClientId),
    ChannelMessage(ClientId, String),
    /// Host's own keyboard
    LocalInput(Direction),
    LocalSkill,
    StartRound,
    Shutdown,
}

pub struct HostSession<F> {
    engine: SimulationEngine,
    links: ConnectionOrchestrator<F>,
    broadcaster: Broadcaster,
    /// Guest id -> slot
    peers: HashMap<ClientId, usize>,
}

impl<F: LinkFactory> HostSession<F> {
    pub fn new(config: SimConfig, links: ConnectionOrchestrator<F>) -> Self {
        let mut engine = SimulationEngine::new(config);
        if let Err(e) = engine.activate_slot(HOST_SLOT) {
            debug!(error = %e, "Host slot spawn pending");
        }
        Self {
            engine,
            links,
            broadcaster: Broadcaster::new(),
            peers: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &SimulationEngine {
        &self.engine
    }

    pub fn links(&self) -> &ConnectionOrchestrator<F> {
        &self.links
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn slot_of(&self, peer: &ClientId) -> Option<usize> {
        self.peers.get(peer).copied()
    }

    /// Signaling messages waiting to go to the relay
    pub fn drain_signals(&mut self) -> Vec<SignalClientMsg> {
        self.links.drain_signals()
    }

    /// Returns `false` once the session should stop
    pub fn handle_event(&mut self, event: HostEvent) -> bool {
        match event {
            HostEvent::Signal(msg) => self.on_signal(msg),
            HostEvent::LocalCandidate(peer, candidate) => {
                if let Err(e) = self.links.on_local_candidate(&peer, &candidate) {
                    debug!(peer = %peer, error = %e, "Dropped local candidate");
                }
            }
            HostEvent::ChannelOpen(peer) => self.links.on_channel_open(&peer),
            HostEvent::ChannelClosed(peer) => self.links.on_channel_closed(&peer),
            HostEvent::ChannelMessage(peer, text) => self.links.on_message(&peer, text),
            HostEvent::LocalInput(dir) => ignore(self.engine.queue_input(HOST_SLOT, dir)),
            HostEvent::LocalSkill => {
                let result = self.engine.activate_skill(HOST_SLOT).map(|_| ());
                ignore(result);
            }
            HostEvent::StartRound => {
                if let Err(e) = self.start_round() {
                    info!(error = %e, "Round not started");
                }
            }
            HostEvent::Shutdown => {
                self.links.close_all();
                self.process_link_events();
                return false;
            }
        }
        self.process_link_events();
        true
    }

    pub fn on_signal(&mut self, msg: SignalServerMsg) {
        match msg {
            SignalServerMsg::PeerJoined {
                id, player_index, ..
            } => self.on_peer_joined(id, player_index),
            SignalServerMsg::PeerLeft { id, .. } => self.free_peer(&id),
            SignalServerMsg::Offer { .. }
            | SignalServerMsg::Answer { .. }
            | SignalServerMsg::Candidate { .. } => {
                if let Err(e) = self.links.handle_signal(&msg) {
                    warn!(error = %e, kind = msg.kind(), "Negotiation failure");
                }
            }
            other => debug!(kind = other.kind(), "Signal ignored by host"),
        }
    }

    fn on_peer_joined(&mut self, id: ClientId, slot: usize) {
        info!(peer = %id, slot, "Guest joined");
        self.peers.insert(id.clone(), slot);
        // Slots already waiting for room go before the newcomer
        self.retry_pending_spawns();
        if let Err(e) = self.engine.activate_slot(slot) {
            debug!(peer = %id, slot, error = %e, "Guest spawn pending");
        }
        if let Err(e) = self.links.connect(id.clone()) {
            warn!(peer = %id, error = %e, "Failed to start negotiation");
        }
        self.broadcaster.state(&self.engine, &mut self.links);
    }

    /// Relay `peer_left` and link close both land here; the second is a no-op
    fn free_peer(&mut self, peer: &ClientId) {
        let Some(slot) = self.peers.remove(peer) else {
            return;
        };
        info!(peer = %peer, slot, "Guest left");
        ignore(self.engine.deactivate_slot(slot));
        self.links.close(peer);
        self.retry_pending_spawns();
        self.broadcaster.state(&self.engine, &mut self.links);
    }

    fn retry_pending_spawns(&mut self) {
        let spawned = self.engine.retry_pending_spawns();
        if !spawned.is_empty() {
            debug!(?spawned, "Pending spawns placed");
        }
    }

    fn on_peer_message(&mut self, peer: &ClientId, text: &str) {
        let Some(slot) = self.slot_of(peer) else {
            debug!(peer = %peer, "Message from unknown peer");
            return;
        };
        let msg = match PeerMsg::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropped peer message");
                return;
            }
        };
        match msg {
            PeerMsg::Input { dir } => ignore(self.engine.queue_input(slot, dir)),
            PeerMsg::Skill {} => {
                let result = self.engine.activate_skill(slot).map(|_| ());
                ignore(result);
            }
            other => {
                let e = ProtocolError::Unexpected(other.tag());
                debug!(peer = %peer, error = %e, "Dropped peer message");
            }
        }
    }

    fn process_link_events(&mut self) {
        while let Some(event) = self.links.next_event() {
            match event {
                // No catch-up: the next tick's snapshot reaches the new link
                LinkEvent::Ready(peer) => info!(peer = %peer, "Guest link ready"),
                LinkEvent::Closed(peer) => self.free_peer(&peer),
                LinkEvent::Message(peer, text) => self.on_peer_message(&peer, &text),
            }
        }
    }

    pub fn start_round(&mut self) -> Result<(), StateInconsistency> {
        self.engine.start_round()?;
        self.broadcaster.round_start(&self.engine, &mut self.links);
        Ok(())
    }

    /// One simulation step plus its broadcasts
    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.engine.tick();
        match &outcome {
            TickOutcome::Idle => {}
            TickOutcome::Running { .. } => {
                self.broadcaster.state(&self.engine, &mut self.links);
            }
            TickOutcome::Ended(result) => {
                self.broadcaster.state(&self.engine, &mut self.links);
                self.broadcaster
                    .game_over(result, self.engine.wins(), &mut self.links);
            }
        }
        outcome
    }

    /// Drive the session: tick timer while a round is active, events otherwise.
    /// Signals produced along the way are handed to `signals`.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<HostEvent>,
        signals: mpsc::UnboundedSender<SignalClientMsg>,
    ) {
        let period = self.engine.config().tick;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_ms = period.as_millis() as u64, "Host session started");

        loop {
            let active = self.engine.phase() == RoundPhase::Active;
            tokio::select! {
                _ = ticker.tick(), if active => {
                    self.on_tick();
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if !self.handle_event(event) {
                        break;
                    }
                    if !active && self.engine.phase() == RoundPhase::Active {
                        // First tick one period after the start
                        ticker.reset();
                    }
                }
            }

            for msg in self.drain_signals() {
                if signals.send(msg).is_err() {
                    warn!("Signaling channel closed");
                }
            }
        }

        for msg in self.drain_signals() {
            let _ = signals.send(msg);
        }
        info!("Host session stopped");
    }
}

fn ignore(result: Result<(), StateInconsistency>) {
    if let Err(e) = result {
        debug!(error = %e, "Command ignored");
    }
}

impl<F: LinkFactory> TickTarget for HostSession<F> {
    fn on_tick(&mut self) -> TickControl {
        match self.tick() {
            TickOutcome::Running { .. } => TickControl::Continue,
            TickOutcome::Idle | TickOutcome::Ended(_) => TickControl::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::game::scheduler::drive_ticks;
    use crate::game::snake::Snake;
    use crate::peer::link::testing::RecordingFactory;

    fn host() -> (HostSession<RecordingFactory>, RecordingFactory) {
        let factory = RecordingFactory::default();
        let links = ConnectionOrchestrator::new(factory.clone());
        (HostSession::new(SimConfig::default().with_seed(11), links), factory)
    }

    fn joined(id: &str, slot: usize) -> HostEvent {
        HostEvent::Signal(SignalServerMsg::PeerJoined {
            id: ClientId::from(id),
            player_index: slot,
            name: format!("Player {}", slot + 1),
        })
    }

    fn open(host: &mut HostSession<RecordingFactory>, id: &str) {
        host.handle_event(HostEvent::ChannelOpen(ClientId::from(id)));
    }

    #[test]
    fn peer_joined_activates_slot_and_sends_offer() {
        let (mut host, _) = host();
        host.handle_event(joined("p2", 1));

        assert!(host.engine().is_active(1));
        assert!(host.engine().state().snakes[1].alive);
        let signals = host.drain_signals();
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0], SignalClientMsg::Offer { .. }));
    }

    #[test]
    fn guest_input_steers_its_own_slot() {
        let (mut host, _) = host();
        assert_err!(host.start_round());
        host.handle_event(joined("p2", 1));
        open(&mut host, "p2");
        assert_ok!(host.start_round());

        let input = PeerMsg::Input { dir: Direction::Up }.encode().unwrap();
        host.handle_event(HostEvent::ChannelMessage(ClientId::from("p2"), input));
        host.tick();
        assert_eq!(host.engine().state().snakes[1].dir, Direction::Up);
        assert_eq!(host.engine().state().snakes[0].dir, Direction::Right);
    }

    #[test]
    fn guest_skill_uses_its_slot_kind() {
        let (mut host, _) = host();
        host.handle_event(joined("p2", 1));
        open(&mut host, "p2");
        host.start_round().unwrap();

        let skill = PeerMsg::Skill {}.encode().unwrap();
        host.handle_event(HostEvent::ChannelMessage(ClientId::from("p2"), skill));
        assert_eq!(host.engine().skills()[1].ghost_ticks, host.engine().config().ghost_ticks);
        assert!(!host.engine().skills()[0].shield);
    }

    #[test]
    fn peer_left_and_link_close_free_the_slot_once() {
        let (mut host, _) = host();
        host.handle_event(joined("p2", 1));
        open(&mut host, "p2");

        host.handle_event(HostEvent::Signal(SignalServerMsg::PeerLeft {
            id: ClientId::from("p2"),
            player_index: 1,
        }));
        assert!(!host.engine().is_active(1));
        assert!(host.links().link_state(&ClientId::from("p2")).is_none());

        // The late close notification is a no-op
        host.handle_event(HostEvent::ChannelClosed(ClientId::from("p2")));
        assert!(!host.engine().is_active(1));
        assert!(host.slot_of(&ClientId::from("p2")).is_none());
    }

    #[test]
    fn later_join_places_a_pending_snake_first() {
        let factory = RecordingFactory::default();
        let links = ConnectionOrchestrator::new(factory);
        let config = SimConfig::default().with_grid(3, 1).with_seed(11);
        let mut host = HostSession::new(config, links);

        // The host snake fills the 3x1 board
        host.handle_event(joined("p2", 1));
        assert!(host.engine().is_active(1));
        assert!(!host.engine().state().snakes[1].alive);

        host.engine.place_snake(HOST_SLOT, Snake::empty());
        host.handle_event(joined("p3", 2));
        assert!(host.engine().state().snakes[1].alive);
        assert!(host.engine().is_active(2));
        assert!(!host.engine().state().snakes[2].alive);
    }

    #[test]
    fn link_close_alone_frees_the_slot() {
        let (mut host, _) = host();
        host.handle_event(joined("p2", 1));
        open(&mut host, "p2");
        host.handle_event(HostEvent::ChannelClosed(ClientId::from("p2")));
        assert!(!host.engine().is_active(1));
    }

    #[test]
    fn snapshots_reach_only_open_links() {
        let (mut host, factory) = host();
        host.handle_event(joined("p2", 1));
        host.handle_event(joined("p3", 2));
        open(&mut host, "p2");
        host.start_round().unwrap();
        host.tick();

        let to_p2 = factory.log.sent_to("p2");
        let kinds: Vec<String> = to_p2
            .iter()
            .map(|t| PeerMsg::decode(t).unwrap().tag().to_string())
            .collect();
        assert_eq!(kinds, vec!["round_start", "state"]);
        assert!(factory.log.sent_to("p3").is_empty());
    }

    #[test]
    fn host_messages_from_guests_are_dropped() {
        let (mut host, _) = host();
        host.handle_event(joined("p2", 1));
        open(&mut host, "p2");
        host.start_round().unwrap();
        let before = host.engine().state().clone();

        let bogus = PeerMsg::State {
            state: Default::default(),
            skills: crate::peer::protocol::SkillMeta::for_all(&Default::default()),
        }
        .encode()
        .unwrap();
        host.handle_event(HostEvent::ChannelMessage(ClientId::from("p2"), bogus));
        host.handle_event(HostEvent::ChannelMessage(ClientId::from("p2"), "garbage".into()));
        assert_eq!(host.engine().state(), &before);
    }

    #[test]
    fn round_ends_with_game_over_broadcast() {
        let (mut host, factory) = host();
        host.handle_event(joined("p2", 1));
        open(&mut host, "p2");
        host.start_round().unwrap();

        let ticks = drive_ticks(&mut host, 2000);
        assert!(ticks < 2000);
        assert_eq!(host.engine().phase(), RoundPhase::Ended);

        let last = factory.log.sent_to("p2").pop().unwrap();
        let PeerMsg::GameOver { results, wins } = PeerMsg::decode(&last).unwrap() else {
            panic!("expected game_over last");
        };
        assert_eq!(wins.iter().sum::<u32>() as usize, results.winners.len());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_ticks_after_start_and_stops_on_shutdown() {
        let (host, factory) = host();
        let (tx, rx) = mpsc::channel(16);
        let (sig_tx, mut sig_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(host.run(rx, sig_tx));

        tx.send(joined("p2", 1)).await.unwrap();
        tx.send(HostEvent::ChannelOpen(ClientId::from("p2"))).await.unwrap();
        tx.send(HostEvent::StartRound).await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(HostEvent::Shutdown).await.unwrap();
        task.await.unwrap();

        let offer = sig_rx.recv().await.unwrap();
        assert!(matches!(offer, SignalClientMsg::Offer { .. }));
        let states = factory
            .log
            .sent_to("p2")
            .iter()
            .filter(|t| PeerMsg::decode(t).map(|m| m.tag() == "state").unwrap_or(false))
            .count();
        // The link opened after the join snapshot, so these are all ticks
        assert!(states >= 3, "got {states} state snapshots");
    }
}
