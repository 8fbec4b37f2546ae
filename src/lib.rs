//! # telemetry-relay
//!
//! Relays real-time telemetry from a UDP multicast bus to live WebSocket
//! subscribers.
//!
//! Producers emit framed datagrams, splitting large messages into
//! fragments. The relay decodes each datagram, reassembles fragments,
//! normalizes everything into a self-describing envelope and fans it out to
//! every open subscriber. Delivery is best-effort: incomplete messages are
//! dropped once stale and slow subscribers miss envelopes rather than
//! receive old ones.
//!
//! ## Envelope
//! ```text
//! [0x81D9(2)] [ChannelLen(1)] [Channel(ChannelLen)] [Payload]
//! ```
//!
//! ## Example
//! ```rust
//! use bytes::Bytes;
//! use telemetry_relay::core::packet::{decode, Frame};
//!
//! let datagram = Bytes::from_static(b"LC02\x00\x00\x00\x07pose\x00\xAA\xBB");
//! let Ok(Frame::Single(msg)) = decode(datagram) else { panic!() };
//! assert_eq!(msg.envelope.to_bytes().as_ref(), b"\x81\xD9\x04pose\xAA\xBB");
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use service::{RelayService, RelaySockets};
