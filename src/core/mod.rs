//! # Core Protocol Components
//!
//! Wire-level handling of telemetry datagrams.
//!
//! ## Components
//! - **Packet**: classifies datagrams by magic and parses framed headers
//! - **Envelope**: the normalized `marker + channel + payload` format
//! - **Reassembly**: joins multi-datagram messages, expiring stale ones
//!
//! ## Wire Format
//! ```text
//! Envelope: [0x81D9(2)] [ChannelLen(1)] [Channel] [Payload]
//! Single:   [0x4C43 3032(4)] [Seq(4)] [Channel\0] [Payload]
//! Fragment: [0x4C43 3033(4)] [Seq(4)] [Total(4)] [Offset(4)] [Index(2)] [Count(2)] [Chunk]
//! ```

pub mod envelope;
pub mod packet;
pub mod reassembly;
