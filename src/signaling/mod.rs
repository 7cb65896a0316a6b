//! Signaling side: room registry, relay and the websocket endpoint

pub mod handler;
pub mod protocol;
pub mod registry;
pub mod relay;

pub use protocol::{ClientId, RelayKind, RelayPayload, Role, SignalClientMsg, SignalServerMsg};
pub use registry::{Delivery, JoinOutcome, RoomRegistry, MAX_PLAYERS};
pub use relay::SignalingRelay;
