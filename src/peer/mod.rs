//! Direct participant-to-participant links and the sessions built on them

pub mod broadcast;
pub mod guest;
pub mod host;
pub mod link;
pub mod orchestrator;
pub mod protocol;

pub use broadcast::Broadcaster;
pub use guest::{GuestEvent, GuestSession, RenderSink};
pub use host::{HostEvent, HostSession, HOST_SLOT};
pub use link::{
    IceCandidate, LinkBackend, LinkFactory, LinkState, PeerLink, SdpType, SessionDescription,
    DEFAULT_ICE_SERVERS,
};
pub use orchestrator::{ConnectionOrchestrator, LinkEvent};
pub use protocol::{PeerMsg, SkillMeta};
