//! HTTP surface: health check and the signaling websocket endpoint

pub mod routes;

pub use routes::build_router;
