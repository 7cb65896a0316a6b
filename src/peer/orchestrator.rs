//! Per-peer negotiation driven by relayed signaling messages
//!
//! The orchestrator never talks to the relay or the backend's event loop
//! itself: outbound signaling messages and link events are queued and drained
//! by whoever owns it (the host or guest session task).

use std::collections::{HashMap, VecDeque};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{LinkError, NegotiationError};
use crate::signaling::{ClientId, RelayKind, RelayPayload, SignalClientMsg, SignalServerMsg};

use super::link::{
    CandidateDisposition, IceCandidate, LinkFactory, LinkState, PeerLink, SessionDescription,
    DEFAULT_ICE_SERVERS,
};

/// Link lifecycle notifications for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Data channel open
    Ready(ClientId),
    Closed(ClientId),
    Message(ClientId, String),
}

pub struct ConnectionOrchestrator<F> {
    factory: F,
    ice_servers: Vec<String>,
    links: HashMap<ClientId, PeerLink>,
    /// Candidates relayed before the peer's offer created a link
    early: HashMap<ClientId, VecDeque<IceCandidate>>,
    signals: Vec<SignalClientMsg>,
    events: VecDeque<LinkEvent>,
}

impl<F: LinkFactory> ConnectionOrchestrator<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            links: HashMap::new(),
            early: HashMap::new(),
            signals: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }

    pub fn link_state(&self, peer: &ClientId) -> Option<LinkState> {
        self.links.get(peer).map(PeerLink::state)
    }

    pub fn connected_peers(&self) -> Vec<ClientId> {
        self.links
            .values()
            .filter(|l| l.state() == LinkState::Connected)
            .map(|l| l.peer().clone())
            .collect()
    }

    /// Signaling messages to hand to the relay
    pub fn drain_signals(&mut self) -> Vec<SignalClientMsg> {
        std::mem::take(&mut self.signals)
    }

    pub fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.pop_front()
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    /// Initiator side: open a link to `peer` and send the offer
    pub fn connect(&mut self, peer: ClientId) -> Result<(), NegotiationError> {
        self.close(&peer);
        let backend = self.factory.create(&peer, &self.ice_servers);
        let mut link = PeerLink::new(peer.clone(), backend);
        let offer = link.start_offer()?;
        self.links.insert(peer.clone(), link);
        self.push_signal(RelayKind::Offer, &peer, "sdp", &offer)?;
        info!(peer = %peer, "Offer sent");
        Ok(())
    }

    /// Apply a relayed offer/answer/candidate; other messages are ignored
    pub fn handle_signal(&mut self, msg: &SignalServerMsg) -> Result<(), NegotiationError> {
        match msg {
            SignalServerMsg::Offer { from, payload, .. } => {
                let offer: SessionDescription = field(payload, "sdp")?;
                let early = self.early.remove(from).unwrap_or_default();
                self.close(from);
                let backend = self.factory.create(from, &self.ice_servers);
                let mut link = PeerLink::new(from.clone(), backend);
                for candidate in early {
                    link.add_remote_candidate(candidate)?;
                }
                let answer = link.accept_offer(&offer)?;
                self.links.insert(from.clone(), link);
                self.push_signal(RelayKind::Answer, from, "sdp", &answer)?;
                info!(peer = %from, "Answer sent");
            }
            SignalServerMsg::Answer { from, payload, .. } => {
                let answer: SessionDescription = field(payload, "sdp")?;
                self.link_mut(from)?.accept_answer(&answer)?;
                debug!(peer = %from, "Remote answer applied");
            }
            SignalServerMsg::Candidate { from, payload, .. } => {
                let candidate: IceCandidate = field(payload, "candidate")?;
                let Some(link) = self.links.get_mut(from) else {
                    let early = self.early.entry(from.clone()).or_default();
                    early.push_back(candidate);
                    debug!(peer = %from, pending = early.len(), "Candidate held until offer");
                    return Ok(());
                };
                match link.add_remote_candidate(candidate) {
                    Ok(CandidateDisposition::Queued) => {
                        debug!(peer = %from, pending = link.pending_candidates(), "Candidate queued");
                    }
                    Ok(CandidateDisposition::Applied) => {}
                    Err(e) => {
                        // Negotiation carries on with the remaining candidates
                        warn!(peer = %from, error = %e, "Failed to add remote candidate");
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Backend notifications
    // ------------------------------------------------------------------

    pub fn on_local_candidate(
        &mut self,
        peer: &ClientId,
        candidate: &IceCandidate,
    ) -> Result<(), NegotiationError> {
        if !self.links.contains_key(peer) {
            return Err(NegotiationError::UnknownPeer(peer.to_string()));
        }
        self.push_signal(RelayKind::Candidate, peer, "candidate", candidate)
    }

    pub fn on_channel_open(&mut self, peer: &ClientId) {
        let Some(link) = self.links.get_mut(peer) else {
            return;
        };
        if link.mark_open() {
            info!(peer = %peer, "Link open");
            self.events.push_back(LinkEvent::Ready(peer.clone()));
        }
    }

    pub fn on_channel_closed(&mut self, peer: &ClientId) {
        self.close(peer);
    }

    pub fn on_message(&mut self, peer: &ClientId, text: String) {
        if self.link_state(peer) == Some(LinkState::Connected) {
            self.events.push_back(LinkEvent::Message(peer.clone(), text));
        }
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    pub fn send_to(&mut self, peer: &ClientId, text: &str) -> Result<(), LinkError> {
        match self.links.get_mut(peer) {
            Some(link) => link.send(text),
            None => Err(LinkError::NotOpen),
        }
    }

    /// Send `text` to every open link; returns how many accepted it
    pub fn send_all(&mut self, text: &str) -> usize {
        let mut sent = 0;
        for link in self.links.values_mut() {
            if link.state() != LinkState::Connected {
                continue;
            }
            match link.send(text) {
                Ok(()) => sent += 1,
                Err(e) => warn!(peer = %link.peer(), error = %e, "Send failed"),
            }
        }
        sent
    }

    /// Close and forget the link to `peer`, emitting `Closed` once
    pub fn close(&mut self, peer: &ClientId) -> bool {
        self.early.remove(peer);
        let Some(mut link) = self.links.remove(peer) else {
            return false;
        };
        link.close();
        info!(peer = %peer, "Link closed");
        self.events.push_back(LinkEvent::Closed(peer.clone()));
        true
    }

    pub fn close_all(&mut self) {
        let peers: Vec<ClientId> = self.links.keys().cloned().collect();
        for peer in peers {
            self.close(&peer);
        }
    }

    fn link_mut(&mut self, peer: &ClientId) -> Result<&mut PeerLink, NegotiationError> {
        self.links
            .get_mut(peer)
            .ok_or_else(|| NegotiationError::UnknownPeer(peer.to_string()))
    }

    fn push_signal<T: Serialize>(
        &mut self,
        kind: RelayKind,
        to: &ClientId,
        key: &str,
        value: &T,
    ) -> Result<(), NegotiationError> {
        let value =
            serde_json::to_value(value).map_err(|e| NegotiationError::Payload(e.to_string()))?;
        let mut payload = RelayPayload::new();
        payload.insert(key.to_string(), value);
        self.signals
            .push(SignalClientMsg::relay(kind, Some(to.clone()), payload));
        Ok(())
    }
}

fn field<T: DeserializeOwned>(payload: &RelayPayload, key: &str) -> Result<T, NegotiationError> {
    let value = payload
        .get(key)
        .ok_or_else(|| NegotiationError::Payload(format!("missing `{key}`")))?;
    serde_json::from_value(value.clone()).map_err(|e| NegotiationError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::peer::link::testing::{candidate, Call, RecordingFactory};
    use crate::peer::link::SdpType;

    fn relayed(kind: RelayKind, from: &str, key: &str, value: serde_json::Value) -> SignalServerMsg {
        let mut payload = RelayPayload::new();
        payload.insert(key.to_string(), value);
        SignalServerMsg::relayed(kind, ClientId::from(from), Some(ClientId::from("me")), payload)
    }

    fn sdp(kind: &str) -> serde_json::Value {
        json!({"type": kind, "sdp": "v=0"})
    }

    #[test]
    fn connect_sends_offer_addressed_to_peer() {
        let factory = RecordingFactory::default();
        let mut orch = ConnectionOrchestrator::new(factory.clone());
        orch.connect(ClientId::from("p2")).unwrap();

        let signals = orch.drain_signals();
        assert_eq!(signals.len(), 1);
        let value = serde_json::to_value(&signals[0]).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["to"], "p2");
        assert_eq!(value["sdp"]["type"], "offer");
        assert_eq!(orch.link_state(&ClientId::from("p2")), Some(LinkState::NegotiatingLocal));
        assert_eq!(factory.ice_servers_seen.lock().len(), DEFAULT_ICE_SERVERS.len());
    }

    #[test]
    fn responder_answers_and_applies_queued_candidates_after_offer() {
        let factory = RecordingFactory::default();
        let mut orch = ConnectionOrchestrator::new(factory.clone());
        let host = ClientId::from("p1");

        orch.handle_signal(&relayed(RelayKind::Offer, "p1", "sdp", sdp("offer")))
            .unwrap();
        let answer = serde_json::to_value(&orch.drain_signals()[0]).unwrap();
        assert_eq!(answer["type"], "answer");
        assert_eq!(answer["to"], "p1");
        assert_eq!(orch.link_state(&host), Some(LinkState::NegotiatingRemote));

        let c = serde_json::to_value(candidate("c1")).unwrap();
        orch.handle_signal(&relayed(RelayKind::Candidate, "p1", "candidate", c))
            .unwrap();
        assert_eq!(
            factory.log.for_peer("p1"),
            vec![
                Call::SetRemote(SdpType::Offer),
                Call::CreateAnswer,
                Call::SetLocal(SdpType::Answer),
                Call::AddCandidate("c1".into()),
            ]
        );
    }

    #[test]
    fn candidates_before_offer_are_applied_after_it_in_order() {
        let factory = RecordingFactory::default();
        let mut orch = ConnectionOrchestrator::new(factory.clone());

        for name in ["early", "later"] {
            let c = serde_json::to_value(candidate(name)).unwrap();
            orch.handle_signal(&relayed(RelayKind::Candidate, "p1", "candidate", c))
                .unwrap();
        }
        assert_eq!(orch.link_state(&ClientId::from("p1")), None);

        orch.handle_signal(&relayed(RelayKind::Offer, "p1", "sdp", sdp("offer")))
            .unwrap();
        assert_eq!(
            factory.log.for_peer("p1"),
            vec![
                Call::SetRemote(SdpType::Offer),
                Call::AddCandidate("early".into()),
                Call::AddCandidate("later".into()),
                Call::CreateAnswer,
                Call::SetLocal(SdpType::Answer),
            ]
        );
    }

    #[test]
    fn closing_a_peer_forgets_its_held_candidates() {
        let factory = RecordingFactory::default();
        let mut orch = ConnectionOrchestrator::new(factory.clone());
        let peer = ClientId::from("p1");

        let c = serde_json::to_value(candidate("stale")).unwrap();
        orch.handle_signal(&relayed(RelayKind::Candidate, "p1", "candidate", c))
            .unwrap();
        orch.close(&peer);
        orch.handle_signal(&relayed(RelayKind::Offer, "p1", "sdp", sdp("offer")))
            .unwrap();

        assert!(!factory
            .log
            .for_peer("p1")
            .contains(&Call::AddCandidate("stale".into())));
    }

    #[test]
    fn candidates_before_answer_wait_for_remote_description() {
        let factory = RecordingFactory::default();
        let mut orch = ConnectionOrchestrator::new(factory.clone());
        orch.connect(ClientId::from("p2")).unwrap();

        for name in ["x", "y"] {
            let c = serde_json::to_value(candidate(name)).unwrap();
            orch.handle_signal(&relayed(RelayKind::Candidate, "p2", "candidate", c))
                .unwrap();
        }
        assert!(!factory
            .log
            .for_peer("p2")
            .iter()
            .any(|c| matches!(c, Call::AddCandidate(_))));

        orch.handle_signal(&relayed(RelayKind::Answer, "p2", "sdp", sdp("answer")))
            .unwrap();
        let tail: Vec<Call> = factory.log.for_peer("p2").into_iter().rev().take(3).collect();
        assert_eq!(
            tail,
            vec![
                Call::AddCandidate("y".into()),
                Call::AddCandidate("x".into()),
                Call::SetRemote(SdpType::Answer),
            ]
        );
    }

    #[test]
    fn links_are_independent() {
        let factory = RecordingFactory::default();
        let mut orch = ConnectionOrchestrator::new(factory.clone());
        orch.connect(ClientId::from("p2")).unwrap();
        orch.connect(ClientId::from("p3")).unwrap();

        // p2 is still waiting for its answer, p3 gets one
        orch.handle_signal(&relayed(RelayKind::Answer, "p3", "sdp", sdp("answer")))
            .unwrap();
        let c = serde_json::to_value(candidate("late")).unwrap();
        orch.handle_signal(&relayed(RelayKind::Candidate, "p3", "candidate", c))
            .unwrap();

        assert!(factory.log.for_peer("p3").contains(&Call::AddCandidate("late".into())));
        assert_eq!(orch.link_state(&ClientId::from("p2")), Some(LinkState::NegotiatingLocal));
    }

    #[test]
    fn ready_and_closed_events_are_emitted_once() {
        let factory = RecordingFactory::default();
        let mut orch = ConnectionOrchestrator::new(factory);
        let peer = ClientId::from("p2");
        orch.connect(peer.clone()).unwrap();

        orch.on_channel_open(&peer);
        orch.on_channel_open(&peer);
        assert_eq!(orch.next_event(), Some(LinkEvent::Ready(peer.clone())));
        assert_eq!(orch.next_event(), None);

        assert_eq!(orch.send_all("{}"), 1);

        orch.on_channel_closed(&peer);
        orch.on_channel_closed(&peer);
        assert_eq!(orch.next_event(), Some(LinkEvent::Closed(peer.clone())));
        assert_eq!(orch.next_event(), None);
        assert_eq!(orch.send_all("{}"), 0);
    }

    #[test]
    fn send_all_skips_links_still_negotiating() {
        let factory = RecordingFactory::default();
        let mut orch = ConnectionOrchestrator::new(factory.clone());
        orch.connect(ClientId::from("p2")).unwrap();
        orch.connect(ClientId::from("p3")).unwrap();
        orch.on_channel_open(&ClientId::from("p3"));

        assert_eq!(orch.send_all("snap"), 1);
        assert_eq!(factory.log.sent_to("p3"), vec!["snap".to_string()]);
        assert!(factory.log.sent_to("p2").is_empty());
    }

    #[test]
    fn unknown_peer_and_bad_payload_are_errors() {
        let mut orch = ConnectionOrchestrator::new(RecordingFactory::default());
        let err = orch
            .handle_signal(&relayed(RelayKind::Answer, "p9", "sdp", sdp("answer")))
            .unwrap_err();
        assert_eq!(err, NegotiationError::UnknownPeer("p9".into()));

        let err = orch
            .handle_signal(&relayed(RelayKind::Offer, "p1", "nope", json!(1)))
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Payload(_)));
    }

    #[test]
    fn local_candidates_become_signals() {
        let mut orch = ConnectionOrchestrator::new(RecordingFactory::default());
        let peer = ClientId::from("p2");
        orch.connect(peer.clone()).unwrap();
        orch.drain_signals();

        orch.on_local_candidate(&peer, &candidate("mine")).unwrap();
        let value = serde_json::to_value(&orch.drain_signals()[0]).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["to"], "p2");
        assert_eq!(value["candidate"]["candidate"], "mine");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
    }
}
