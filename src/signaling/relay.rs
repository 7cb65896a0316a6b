//! Signaling relay - per-connection message router on top of the room registry

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{JoinError, ProtocolError};

use super::protocol::{ClientId, SignalClientMsg, SignalServerMsg};
use super::registry::{Delivery, RoomRegistry};

/// Outbound half of one client connection
pub type ClientSender = mpsc::UnboundedSender<SignalServerMsg>;

/// Routes signaling frames between connected clients
pub struct SignalingRelay {
    registry: Mutex<RoomRegistry>,
    connections: DashMap<ClientId, ClientSender>,
    next_id: AtomicU64,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(RoomRegistry::new()),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection and hand back its id and outbound queue
    pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<SignalServerMsg>) {
        let id = ClientId::from_seq(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id.clone(), tx);
        debug!(client_id = %id, "Signaling client connected");
        (id, rx)
    }

    /// Handle one inbound text frame. Bad frames are dropped, never fatal.
    pub fn handle_frame(&self, client: &ClientId, text: &str) {
        let msg = match serde_json::from_str::<SignalClientMsg>(text) {
            Ok(msg) => msg,
            Err(e) => {
                let err = ProtocolError::from(e);
                debug!(client_id = %client, error = %err, "Dropping signaling frame");
                return;
            }
        };
        self.handle_msg(client, msg);
    }

    /// Deliveries are queued before the registry lock is released so every
    /// client sees them in mutation order
    pub fn handle_msg(&self, client: &ClientId, msg: SignalClientMsg) {
        let mut registry = self.registry.lock();
        match msg {
            SignalClientMsg::Join { room, name } => {
                match registry.join(client, &room, name.as_deref()) {
                    Ok(_) => {}
                    Err(JoinError::RoomFull { max }) => {
                        debug!(client_id = %client, room = %room, max, "Join rejected");
                    }
                    Err(JoinError::EmptyRoomId) => {
                        debug!(client_id = %client, "Join without room id dropped");
                    }
                }
            }
            other => {
                if let Some((kind, to, payload)) = other.into_relay() {
                    registry.relay(client, kind, to, payload);
                }
            }
        }
        self.dispatch(registry.drain());
    }

    /// Socket closed: leave the room and drop the handle
    pub fn disconnect(&self, client: &ClientId) {
        let mut registry = self.registry.lock();
        registry.leave(client);
        self.connections.remove(client);
        self.dispatch(registry.drain());
        drop(registry);
        debug!(client_id = %client, "Signaling client disconnected");
    }

    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for Delivery { to, msg } in deliveries {
            match self.connections.get(&to) {
                Some(tx) => {
                    if tx.send(msg).is_err() {
                        debug!(client_id = %to, "Outbound queue closed");
                    }
                }
                None => warn!(client_id = %to, kind = msg.kind(), "No connection for delivery"),
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.registry.lock().room_count()
    }

    pub fn client_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new()
    }
}
