//! One negotiated peer link and the backend seam it drives

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LinkError, NegotiationError};
use crate::signaling::ClientId;

/// Label of the single data channel per link
pub const DATA_CHANNEL_LABEL: &str = "game";

/// Public STUN servers used when no list is configured
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun.l.google.com:5349",
    "stun:stun1.l.google.com:3478",
    "stun:stun1.l.google.com:5349",
    "stun:stun2.l.google.com:19302",
    "stun:stun2.l.google.com:5349",
    "stun:stun3.l.google.com:3478",
    "stun:stun3.l.google.com:5349",
    "stun:stun4.l.google.com:19302",
    "stun:stun4.l.google.com:5349",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Opaque session description, `{type, sdp}` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

/// Opaque connectivity candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// The peer-connection stack behind one link.
///
/// Implementations wrap a WebRTC peer connection. Asynchronous backend
/// notifications (local candidates, channel open/close, inbound text) are fed
/// back through [`super::orchestrator::ConnectionOrchestrator`].
pub trait LinkBackend: Send {
    fn create_data_channel(&mut self, label: &str, ordered: bool) -> Result<(), NegotiationError>;
    fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError>;
    fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError>;
    fn set_local_description(&mut self, desc: &SessionDescription) -> Result<(), NegotiationError>;
    fn set_remote_description(&mut self, desc: &SessionDescription) -> Result<(), NegotiationError>;
    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError>;
    fn send(&mut self, text: &str) -> Result<(), LinkError>;
    fn close(&mut self);
}

/// Creates a backend per peer
pub trait LinkFactory {
    fn create(&mut self, peer: &ClientId, ice_servers: &[String]) -> Box<dyn LinkBackend>;
}

/// Negotiation state of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    /// Local offer sent, waiting for the answer
    NegotiatingLocal,
    /// Remote offer answered, waiting for the channel
    NegotiatingRemote,
    Connected,
    Closed,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::NegotiatingLocal => "negotiating_local",
            Self::NegotiatingRemote => "negotiating_remote",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

/// Status line for a UI
impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::New => "Waiting",
            Self::NegotiatingLocal | Self::NegotiatingRemote => "Negotiating",
            Self::Connected => "Open",
            Self::Closed => "Closed",
        };
        f.write_str(status)
    }
}

/// What happened to a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    /// No remote description yet
    Queued,
}

pub struct PeerLink {
    peer: ClientId,
    state: LinkState,
    backend: Box<dyn LinkBackend>,
    has_remote: bool,
    pending: VecDeque<IceCandidate>,
}

impl PeerLink {
    pub fn new(peer: ClientId, backend: Box<dyn LinkBackend>) -> Self {
        Self {
            peer,
            state: LinkState::New,
            backend,
            has_remote: false,
            pending: VecDeque::new(),
        }
    }

    pub fn peer(&self) -> &ClientId {
        &self.peer
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Initiator: open the channel, then create and set the offer
    pub fn start_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.require_state(LinkState::New, "offer")?;
        self.backend.create_data_channel(DATA_CHANNEL_LABEL, true)?;
        let offer = self.backend.create_offer()?;
        self.backend.set_local_description(&offer)?;
        self.state = LinkState::NegotiatingLocal;
        Ok(offer)
    }

    /// Responder: apply the remote offer and produce the answer
    pub fn accept_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.require_state(LinkState::New, "remote offer")?;
        self.apply_remote(offer)?;
        let answer = self.backend.create_answer()?;
        self.backend.set_local_description(&answer)?;
        self.state = LinkState::NegotiatingRemote;
        Ok(answer)
    }

    pub fn accept_answer(&mut self, answer: &SessionDescription) -> Result<(), NegotiationError> {
        self.require_state(LinkState::NegotiatingLocal, "answer")?;
        self.apply_remote(answer)
    }

    pub fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, NegotiationError> {
        if self.state == LinkState::Closed {
            return Err(self.invalid("candidate"));
        }
        if !self.has_remote {
            self.pending.push_back(candidate);
            return Ok(CandidateDisposition::Queued);
        }
        self.backend.add_ice_candidate(&candidate)?;
        Ok(CandidateDisposition::Applied)
    }

    /// Channel reported open; `false` if the link was already open or closed
    pub fn mark_open(&mut self) -> bool {
        match self.state {
            LinkState::Connected | LinkState::Closed => false,
            _ => {
                self.state = LinkState::Connected;
                true
            }
        }
    }

    /// `false` if already closed
    pub fn close(&mut self) -> bool {
        if self.state == LinkState::Closed {
            return false;
        }
        self.backend.close();
        self.pending.clear();
        self.state = LinkState::Closed;
        true
    }

    pub fn send(&mut self, text: &str) -> Result<(), LinkError> {
        if self.state != LinkState::Connected {
            return Err(LinkError::NotOpen);
        }
        self.backend.send(text)
    }

    fn apply_remote(&mut self, desc: &SessionDescription) -> Result<(), NegotiationError> {
        self.backend.set_remote_description(desc)?;
        self.has_remote = true;

        // Queued candidates go in arrival order; one bad candidate does not stop the rest
        let queued = self.pending.len();
        while let Some(candidate) = self.pending.pop_front() {
            if let Err(e) = self.backend.add_ice_candidate(&candidate) {
                warn!(peer = %self.peer, error = %e, "Failed to apply queued candidate");
            }
        }
        if queued > 0 {
            debug!(peer = %self.peer, queued, "Flushed queued candidates");
        }
        Ok(())
    }

    fn require_state(&self, state: LinkState, action: &'static str) -> Result<(), NegotiationError> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> NegotiationError {
        NegotiationError::InvalidState {
            peer: self.peer.to_string(),
            action,
            state: self.state.as_str(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording backend shared by the peer tests

    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        DataChannel(String, bool),
        CreateOffer,
        CreateAnswer,
        SetLocal(SdpType),
        SetRemote(SdpType),
        AddCandidate(String),
        Send(String),
        Close,
    }

    /// Shared log of backend calls, per peer
    #[derive(Default, Clone)]
    pub struct CallLog(pub Arc<Mutex<Vec<(ClientId, Call)>>>);

    impl CallLog {
        pub fn for_peer(&self, peer: &str) -> Vec<Call> {
            self.0
                .lock()
                .iter()
                .filter(|(p, _)| p.as_str() == peer)
                .map(|(_, c)| c.clone())
                .collect()
        }

        pub fn sent_to(&self, peer: &str) -> Vec<String> {
            self.for_peer(peer)
                .into_iter()
                .filter_map(|c| match c {
                    Call::Send(text) => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    pub struct RecordingBackend {
        pub peer: ClientId,
        pub log: CallLog,
        /// Candidates whose application fails
        pub reject: Vec<String>,
    }

    impl RecordingBackend {
        fn push(&self, call: Call) {
            self.log.0.lock().push((self.peer.clone(), call));
        }
    }

    impl LinkBackend for RecordingBackend {
        fn create_data_channel(&mut self, label: &str, ordered: bool) -> Result<(), NegotiationError> {
            self.push(Call::DataChannel(label.to_string(), ordered));
            Ok(())
        }

        fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
            self.push(Call::CreateOffer);
            Ok(SessionDescription {
                kind: SdpType::Offer,
                sdp: format!("offer-for-{}", self.peer),
            })
        }

        fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
            self.push(Call::CreateAnswer);
            Ok(SessionDescription {
                kind: SdpType::Answer,
                sdp: format!("answer-for-{}", self.peer),
            })
        }

        fn set_local_description(&mut self, desc: &SessionDescription) -> Result<(), NegotiationError> {
            self.push(Call::SetLocal(desc.kind));
            Ok(())
        }

        fn set_remote_description(&mut self, desc: &SessionDescription) -> Result<(), NegotiationError> {
            self.push(Call::SetRemote(desc.kind));
            Ok(())
        }

        fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
            self.push(Call::AddCandidate(candidate.candidate.clone()));
            if self.reject.contains(&candidate.candidate) {
                return Err(NegotiationError::Backend("rejected".into()));
            }
            Ok(())
        }

        fn send(&mut self, text: &str) -> Result<(), LinkError> {
            self.push(Call::Send(text.to_string()));
            Ok(())
        }

        fn close(&mut self) {
            self.push(Call::Close);
        }
    }

    #[derive(Default, Clone)]
    pub struct RecordingFactory {
        pub log: CallLog,
        pub reject: Vec<String>,
        pub ice_servers_seen: Arc<Mutex<Vec<String>>>,
    }

    impl LinkFactory for RecordingFactory {
        fn create(&mut self, peer: &ClientId, ice_servers: &[String]) -> Box<dyn LinkBackend> {
            *self.ice_servers_seen.lock() = ice_servers.to_vec();
            Box::new(RecordingBackend {
                peer: peer.clone(),
                log: self.log.clone(),
                reject: self.reject.clone(),
            })
        }
    }

    pub fn candidate(name: &str) -> IceCandidate {
        IceCandidate {
            candidate: name.to_string(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }
}
