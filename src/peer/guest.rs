//! Guest participant: renders host snapshots and sends local input

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{LinkError, ProtocolError};
use crate::game::grid::Direction;
use crate::game::state::{GameState, RoundResult};
use crate::signaling::{ClientId, Role, SignalClientMsg, SignalServerMsg, MAX_PLAYERS};

use super::link::{IceCandidate, LinkFactory};
use super::orchestrator::{ConnectionOrchestrator, LinkEvent};
use super::protocol::{PeerMsg, SkillMeta};

/// Consumer of snapshots (drawing is someone else's job)
pub trait RenderSink {
    fn render(&mut self, state: &GameState, skills: &[SkillMeta; MAX_PLAYERS]);

    fn round_over(&mut self, result: &RoundResult, wins: &[u32; MAX_PLAYERS]);

    /// Human-readable connection status
    fn status(&mut self, _status: &str) {}
}

#[derive(Debug)]
pub enum GuestEvent {
    Signal(SignalServerMsg),
    LocalCandidate(ClientId, IceCandidate),
    ChannelOpen(ClientId),
    ChannelClosed(ClientId),
    ChannelMessage(ClientId, String),
    /// Raw key name from the input source
    Key(String),
    Skill,
    Shutdown,
}

pub struct GuestSession<F, R> {
    links: ConnectionOrchestrator<F>,
    sink: R,
    host: Option<ClientId>,
    slot: Option<usize>,
    last_state: Option<GameState>,
    /// Host left; nothing more is rendered
    stopped: bool,
}

impl<F: LinkFactory, R: RenderSink> GuestSession<F, R> {
    pub fn new(links: ConnectionOrchestrator<F>, sink: R) -> Self {
        Self {
            links,
            sink,
            host: None,
            slot: None,
            last_state: None,
            stopped: false,
        }
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn host(&self) -> Option<&ClientId> {
        self.host.as_ref()
    }

    pub fn last_state(&self) -> Option<&GameState> {
        self.last_state.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn drain_signals(&mut self) -> Vec<SignalClientMsg> {
        self.links.drain_signals()
    }

    /// Returns `false` once the session should stop
    pub fn handle_event(&mut self, event: GuestEvent) -> bool {
        match event {
            GuestEvent::Signal(msg) => self.on_signal(msg),
            GuestEvent::LocalCandidate(peer, candidate) => {
                if let Err(e) = self.links.on_local_candidate(&peer, &candidate) {
                    debug!(peer = %peer, error = %e, "Dropped local candidate");
                }
            }
            GuestEvent::ChannelOpen(peer) => self.links.on_channel_open(&peer),
            GuestEvent::ChannelClosed(peer) => self.links.on_channel_closed(&peer),
            GuestEvent::ChannelMessage(peer, text) => self.links.on_message(&peer, text),
            GuestEvent::Key(key) => {
                self.on_key(&key);
            }
            GuestEvent::Skill => {
                if let Err(e) = self.use_skill() {
                    debug!(error = %e, "Skill not sent");
                }
            }
            GuestEvent::Shutdown => {
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
            SignalServerMsg::Joined {
                role,
                player_index,
                host_id,
                ..
            } => {
                if role != Role::Guest {
                    warn!("Guest session joined as host");
                }
                info!(slot = player_index, host = %host_id, "Joined room");
                self.slot = Some(player_index);
                self.host = Some(host_id);
                self.sink.status("Waiting");
            }
            SignalServerMsg::RoomFull { max } => {
                self.sink.status(&format!("Room full ({max} players)"));
            }
            SignalServerMsg::HostLeft => self.stop(),
            SignalServerMsg::Offer { .. }
            | SignalServerMsg::Answer { .. }
            | SignalServerMsg::Candidate { .. } => {
                if self.stopped {
                    return;
                }
                if let Err(e) = self.links.handle_signal(&msg) {
                    warn!(error = %e, kind = msg.kind(), "Negotiation failure");
                }
            }
            other => debug!(kind = other.kind(), "Signal ignored by guest"),
        }
    }

    /// Map a key to a direction and send it; `false` for unmapped keys
    pub fn on_key(&mut self, key: &str) -> bool {
        let Some(dir) = Direction::from_key(key) else {
            return false;
        };
        if let Err(e) = self.send_input(dir) {
            debug!(error = %e, "Input not sent");
        }
        true
    }

    pub fn send_input(&mut self, dir: Direction) -> Result<(), LinkError> {
        self.send(&PeerMsg::Input { dir })
    }

    pub fn use_skill(&mut self) -> Result<(), LinkError> {
        self.send(&PeerMsg::Skill {})
    }

    fn send(&mut self, msg: &PeerMsg) -> Result<(), LinkError> {
        let host = self.host.clone().ok_or(LinkError::NotOpen)?;
        let text = msg.encode().map_err(|e| LinkError::Send(e.to_string()))?;
        self.links.send_to(&host, &text)
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        info!("Host left, session over");
        self.stopped = true;
        self.links.close_all();
        self.sink.status("Host left");
    }

    fn on_peer_message(&mut self, peer: &ClientId, text: &str) {
        if self.stopped || self.host.as_ref() != Some(peer) {
            return;
        }
        let msg = match PeerMsg::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Dropped host message");
                return;
            }
        };
        match msg {
            PeerMsg::RoundStart { state, skills } | PeerMsg::State { state, skills } => {
                self.sink.render(&state, &skills);
                self.last_state = Some(state);
            }
            PeerMsg::GameOver { results, wins } => self.sink.round_over(&results, &wins),
            other => {
                let e = ProtocolError::Unexpected(other.tag());
                debug!(error = %e, "Dropped host message");
            }
        }
    }

    fn process_link_events(&mut self) {
        while let Some(event) = self.links.next_event() {
            match event {
                LinkEvent::Ready(_) => self.sink.status("Open"),
                LinkEvent::Closed(_) if !self.stopped => self.sink.status("Closed"),
                LinkEvent::Closed(_) => {}
                LinkEvent::Message(peer, text) => self.on_peer_message(&peer, &text),
            }
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<GuestEvent>,
        signals: mpsc::UnboundedSender<SignalClientMsg>,
    ) -> R {
        while let Some(event) = events.recv().await {
            let keep_going = self.handle_event(event);
            for msg in self.drain_signals() {
                if signals.send(msg).is_err() {
                    warn!("Signaling channel closed");
                }
            }
            if !keep_going {
                break;
            }
        }
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::Cell;
    use crate::peer::link::testing::{Call, RecordingFactory};
    use crate::signaling::RelayPayload;
    use serde_json::json;

    #[derive(Default)]
    struct Frames {
        rendered: Vec<GameState>,
        results: Vec<RoundResult>,
        statuses: Vec<String>,
    }

    impl RenderSink for Frames {
        fn render(&mut self, state: &GameState, _skills: &[SkillMeta; MAX_PLAYERS]) {
            self.rendered.push(state.clone());
        }

        fn round_over(&mut self, result: &RoundResult, _wins: &[u32; MAX_PLAYERS]) {
            self.results.push(result.clone());
        }

        fn status(&mut self, status: &str) {
            self.statuses.push(status.to_string());
        }
    }

    fn host_id() -> ClientId {
        ClientId::from("p1")
    }

    /// Guest in slot 1 with an open link to the host
    fn connected_guest() -> (GuestSession<RecordingFactory, Frames>, RecordingFactory) {
        let factory = RecordingFactory::default();
        let mut guest = GuestSession::new(ConnectionOrchestrator::new(factory.clone()), Frames::default());
        guest.handle_event(GuestEvent::Signal(SignalServerMsg::Joined {
            id: ClientId::from("p2"),
            role: Role::Guest,
            player_index: 1,
            host_id: host_id(),
            name: "Player 2".into(),
        }));

        let mut payload = RelayPayload::new();
        payload.insert("sdp".into(), json!({"type": "offer", "sdp": "v=0"}));
        guest.handle_event(GuestEvent::Signal(SignalServerMsg::Offer {
            from: host_id(),
            to: Some(ClientId::from("p2")),
            payload,
        }));
        guest.handle_event(GuestEvent::ChannelOpen(host_id()));
        (guest, factory)
    }

    fn snapshot(apple: Cell) -> String {
        let state = GameState {
            apple,
            ..GameState::default()
        };
        PeerMsg::State {
            state,
            skills: SkillMeta::for_all(&Default::default()),
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn offer_from_host_is_answered() {
        let (mut guest, factory) = connected_guest();
        let signals = guest.drain_signals();
        assert!(matches!(&signals[..], [SignalClientMsg::Answer { to: Some(to), .. }] if to == &host_id()));
        assert!(factory.log.for_peer("p1").contains(&Call::CreateAnswer));
        assert_eq!(guest.slot(), Some(1));
        assert_eq!(guest.sink().statuses.last().map(String::as_str), Some("Open"));
    }

    #[test]
    fn snapshots_are_rendered_in_order() {
        let (mut guest, _) = connected_guest();
        guest.handle_event(GuestEvent::ChannelMessage(host_id(), snapshot(Cell::new(1, 1))));
        guest.handle_event(GuestEvent::ChannelMessage(host_id(), snapshot(Cell::new(2, 2))));
        let apples: Vec<Cell> = guest.sink().rendered.iter().map(|s| s.apple).collect();
        assert_eq!(apples, vec![Cell::new(1, 1), Cell::new(2, 2)]);
        assert_eq!(guest.last_state().map(|s| s.apple), Some(Cell::new(2, 2)));
    }

    #[test]
    fn keys_map_to_inputs_for_the_host() {
        let (mut guest, factory) = connected_guest();
        assert!(guest.on_key("w"));
        assert!(guest.on_key("ArrowLeft"));
        assert!(!guest.on_key("q"));
        tokio_test::assert_ok!(guest.use_skill());

        let sent: Vec<PeerMsg> = factory
            .log
            .sent_to("p1")
            .iter()
            .map(|t| PeerMsg::decode(t).unwrap())
            .collect();
        assert_eq!(
            sent,
            vec![
                PeerMsg::Input { dir: Direction::Up },
                PeerMsg::Input { dir: Direction::Left },
                PeerMsg::Skill {},
            ]
        );
    }

    #[test]
    fn host_left_stops_state_updates() {
        let (mut guest, _) = connected_guest();
        guest.handle_event(GuestEvent::ChannelMessage(host_id(), snapshot(Cell::new(1, 1))));
        guest.handle_event(GuestEvent::Signal(SignalServerMsg::HostLeft));
        assert!(guest.is_stopped());

        guest.handle_event(GuestEvent::ChannelMessage(host_id(), snapshot(Cell::new(9, 9))));
        assert_eq!(guest.sink().rendered.len(), 1);
        assert_eq!(guest.sink().statuses.last().map(String::as_str), Some("Host left"));
        assert_eq!(guest.send_input(Direction::Up), Err(LinkError::NotOpen));
    }

    #[test]
    fn game_over_is_forwarded() {
        let (mut guest, _) = connected_guest();
        let result = RoundResult::compute([Some(2), Some(1), None, None], [true, false, false, false]);
        let text = PeerMsg::GameOver {
            results: result.clone(),
            wins: [1, 0, 0, 0],
        }
        .encode()
        .unwrap();
        guest.handle_event(GuestEvent::ChannelMessage(host_id(), text));
        assert_eq!(guest.sink().results, vec![result]);
    }

    #[tokio::test]
    async fn run_returns_sink_on_shutdown() {
        let (guest, _) = connected_guest();
        let (tx, rx) = mpsc::channel(8);
        let (sig_tx, _sig_rx) = mpsc::unbounded_channel();
        tx.send(GuestEvent::ChannelMessage(host_id(), snapshot(Cell::new(3, 4))))
            .await
            .unwrap();
        tx.send(GuestEvent::Shutdown).await.unwrap();

        let sink = guest.run(rx, sig_tx).await;
        assert_eq!(sink.rendered.len(), 1);
        assert_eq!(sink.statuses.last().map(String::as_str), Some("Closed"));
    }
}
