//! # Error Types
//!
//! Error handling for the telemetry relay.
//!
//! The relay degrades by dropping rather than stalling, so almost every
//! error defined here is handled by logging it and moving on. The only
//! error that ends the process is [`RelayError::FatalTransport`], raised
//! when the multicast input cannot be bound.
//!
//! ## Error Categories
//! - **Fatal transport**: multicast bind/listen failure
//! - **Malformed packets**: unknown magic or sub-type, truncated headers
//! - **Subscriber I/O**: a write to one subscriber failed
//! - **Configuration**: invalid or unreadable configuration
//!
//! ## Example Usage
//! ```rust
//! use telemetry_relay::core::packet::decode;
//! use telemetry_relay::error::RelayError;
//! use bytes::Bytes;
//!
//! match decode(Bytes::from_static(&[0xFF, 0xFF, 0x00])) {
//!     Err(RelayError::UnknownMagic(magic)) => assert_eq!(magic, 0xFFFF),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to avoid allocating on hot error paths.
pub mod constants {
    /// Decoder errors
    pub const ERR_TRUNCATED_MAGIC: &str = "Datagram shorter than the 2-byte magic";
    pub const ERR_TRUNCATED_SUBTYPE: &str = "Framed datagram shorter than the 4-byte magic";
    pub const ERR_TRUNCATED_SINGLE: &str = "Single-message header truncated";
    pub const ERR_TRUNCATED_FRAGMENT: &str = "Fragment header truncated";
    pub const ERR_MISSING_CHANNEL_TERMINATOR: &str = "Channel name is not NUL-terminated";
    pub const ERR_ZERO_FRAGMENT_COUNT: &str = "Fragment count is zero";
    pub const ERR_FRAGMENT_INDEX_RANGE: &str = "Fragment index is outside the fragment count";

    /// Envelope errors
    pub const ERR_TRUNCATED_ENVELOPE: &str = "Envelope shorter than its channel header";
    pub const ERR_NOT_AN_ENVELOPE: &str = "Envelope marker missing";

    /// Startup errors
    pub const ERR_SECONDARY_UNAVAILABLE: &str =
        "Secondary ingest requested but the `zmq` feature is not compiled in";
}

/// Primary error type for every relay operation
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The multicast input could not be set up; the relay has no purpose
    /// without it.
    #[error("Fatal transport error: {0}")]
    FatalTransport(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("Unrecognized packet magic: {0:#06x}")]
    UnknownMagic(u16),

    #[error("Unrecognized framed sub-type: {0:#06x}")]
    UnknownSubtype(u16),

    #[error("Subscriber I/O error: {0}")]
    SubscriberIo(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Secondary ingest error: {0}")]
    Secondary(String),

    /// The reactor stopped listening for subscriber events
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RelayError {
    /// True for errors that concern a single datagram and must only cause
    /// that datagram to be dropped.
    pub fn is_malformed_packet(&self) -> bool {
        matches!(
            self,
            RelayError::MalformedPacket(_)
                | RelayError::UnknownMagic(_)
                | RelayError::UnknownSubtype(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::WebSocket(err.to_string())
    }
}

/// Type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
