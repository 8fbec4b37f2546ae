//! # Transport Adapters
//!
//! Socket-facing code feeding the reactor or draining it.
//!
//! ## Components
//! - **Multicast**: UDP multicast input carrying framed telemetry
//! - **WebSocket**: per-subscriber connection tasks
//! - **Passthrough**: optional secondary input forwarded without decoding

pub mod multicast;
pub mod passthrough;
pub mod websocket;
