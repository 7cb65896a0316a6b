//! Signaling protocol message definitions
//! These are the wire types exchanged between participants and the relay

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Relay-assigned client identity (`p1`, `p2`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn from_seq(seq: u64) -> Self {
        Self(format!("p{}", seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Role granted on join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Slot 0, runs the simulation
    Host,
    Guest,
}

/// Negotiation payload forwarded verbatim (everything but `type`, `to` and `from`)
pub type RelayPayload = Map<String, Value>;

/// The three negotiation message kinds the relay forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    Candidate,
}

impl RelayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }
}

/// Messages sent from a participant to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalClientMsg {
    /// Join (or create) a room
    Join {
        room: String,
        #[serde(default)]
        name: Option<String>,
    },

    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ClientId>,
        #[serde(flatten)]
        payload: RelayPayload,
    },

    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ClientId>,
        #[serde(flatten)]
        payload: RelayPayload,
    },

    Candidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ClientId>,
        #[serde(flatten)]
        payload: RelayPayload,
    },
}

impl SignalClientMsg {
    pub fn relay(kind: RelayKind, to: Option<ClientId>, payload: RelayPayload) -> Self {
        match kind {
            RelayKind::Offer => Self::Offer { to, payload },
            RelayKind::Answer => Self::Answer { to, payload },
            RelayKind::Candidate => Self::Candidate { to, payload },
        }
    }

    /// Split a negotiation message into its parts; `None` for `join`
    pub fn into_relay(self) -> Option<(RelayKind, Option<ClientId>, RelayPayload)> {
        match self {
            Self::Join { .. } => None,
            Self::Offer { to, payload } => Some((RelayKind::Offer, to, payload)),
            Self::Answer { to, payload } => Some((RelayKind::Answer, to, payload)),
            Self::Candidate { to, payload } => Some((RelayKind::Candidate, to, payload)),
        }
    }
}

/// Messages sent from the relay to a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalServerMsg {
    /// Confirmation of a join
    Joined {
        id: ClientId,
        role: Role,
        #[serde(rename = "playerIndex")]
        player_index: usize,
        #[serde(rename = "hostId")]
        host_id: ClientId,
        name: String,
    },

    /// All slots taken
    RoomFull { max: usize },

    /// Occupancy snapshot sent to every member after any membership change
    RoomUpdate {
        count: usize,
        max: usize,
        slots: Vec<bool>,
        names: Vec<Option<String>>,
    },

    /// A guest joined (host only)
    PeerJoined {
        id: ClientId,
        #[serde(rename = "playerIndex")]
        player_index: usize,
        name: String,
    },

    /// A guest left (host only)
    PeerLeft {
        id: ClientId,
        #[serde(rename = "playerIndex")]
        player_index: usize,
    },

    /// The host disconnected; the room is gone
    HostLeft,

    Offer {
        from: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ClientId>,
        #[serde(flatten)]
        payload: RelayPayload,
    },

    Answer {
        from: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ClientId>,
        #[serde(flatten)]
        payload: RelayPayload,
    },

    Candidate {
        from: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ClientId>,
        #[serde(flatten)]
        payload: RelayPayload,
    },
}

impl SignalServerMsg {
    pub fn relayed(
        kind: RelayKind,
        from: ClientId,
        to: Option<ClientId>,
        payload: RelayPayload,
    ) -> Self {
        match kind {
            RelayKind::Offer => Self::Offer { from, to, payload },
            RelayKind::Answer => Self::Answer { from, to, payload },
            RelayKind::Candidate => Self::Candidate { from, to, payload },
        }
    }

    /// Wire tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::RoomFull { .. } => "room_full",
            Self::RoomUpdate { .. } => "room_update",
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
            Self::HostLeft => "host_left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_without_name_parses() {
        let msg: SignalClientMsg = serde_json::from_str(r#"{"type":"join","room":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            SignalClientMsg::Join {
                room: "abc".into(),
                name: None
            }
        );
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(serde_json::from_str::<SignalClientMsg>(r#"{"type":"launch"}"#).is_err());
        assert!(serde_json::from_str::<SignalClientMsg>("not json").is_err());
    }

    #[test]
    fn offer_keeps_unknown_fields_verbatim() {
        let raw = json!({
            "type": "offer",
            "to": "p2",
            "sdp": {"type": "offer", "sdp": "v=0"},
            "extra": 7
        });
        let msg: SignalClientMsg = serde_json::from_value(raw).unwrap();
        let (kind, to, payload) = msg.into_relay().unwrap();
        assert_eq!(kind, RelayKind::Offer);
        assert_eq!(to, Some(ClientId::from("p2")));
        assert_eq!(payload["sdp"]["sdp"], "v=0");
        assert_eq!(payload["extra"], 7);
        assert!(!payload.contains_key("type"));
    }

    #[test]
    fn relayed_message_carries_from() {
        let mut payload = RelayPayload::new();
        payload.insert("candidate".into(), json!({"candidate": "c1"}));
        let msg = SignalServerMsg::relayed(RelayKind::Candidate, "p1".into(), None, payload);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["from"], "p1");
        assert_eq!(value["candidate"]["candidate"], "c1");
        assert!(value.get("to").is_none());
    }

    #[test]
    fn server_messages_use_camel_case_indices() {
        let joined = SignalServerMsg::Joined {
            id: "p3".into(),
            role: Role::Guest,
            player_index: 2,
            host_id: "p1".into(),
            name: "Ana".into(),
        };
        let value = serde_json::to_value(&joined).unwrap();
        assert_eq!(value["playerIndex"], 2);
        assert_eq!(value["hostId"], "p1");
        assert_eq!(value["role"], "guest");

        let left = serde_json::to_value(SignalServerMsg::HostLeft).unwrap();
        assert_eq!(left, json!({"type": "host_left"}));
    }
}
