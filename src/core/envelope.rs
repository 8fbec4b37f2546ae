//! Normalized envelope format broadcast to subscribers.
//!
//! ```text
//! [Marker(2) = 0x81D9] [ChannelLen(1)] [Channel(ChannelLen)] [Payload(N)]
//! ```
//!
//! The payload is opaque to the relay. The channel name is capped at
//! [`MAX_CHANNEL_LEN`] bytes; longer names are silently truncated.

use crate::error::{constants, RelayError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

/// Leading marker of a normalized envelope.
pub const ENVELOPE_MARKER: u16 = 0x81D9;

/// Longest channel name representable in the one-byte length field.
pub const MAX_CHANNEL_LEN: usize = u8::MAX as usize;

/// Bytes preceding the channel name (marker + length).
pub const ENVELOPE_PREFIX_LEN: usize = 3;

/// Clamp a channel name to the envelope limit.
#[inline]
pub fn truncate_channel(channel: &[u8]) -> &[u8] {
    &channel[..channel.len().min(MAX_CHANNEL_LEN)]
}

/// Write `marker + channel_len + channel` into `dst`.
///
/// The fragment path calls this on chunk 0 so that joining every chunk in
/// index order produces a finished envelope.
pub fn encode_header(channel: &[u8], dst: &mut BytesMut) {
    let channel = truncate_channel(channel);
    dst.reserve(ENVELOPE_PREFIX_LEN + channel.len());
    dst.put_u16(ENVELOPE_MARKER);
    dst.put_u8(channel.len() as u8);
    dst.put_slice(channel);
}

/// A channel-tagged telemetry message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    channel: Bytes,
    pub payload: Bytes,
}

impl Envelope {
    /// Build an envelope, truncating the channel to 255 bytes.
    pub fn new(channel: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        let mut channel: Bytes = channel.into();
        channel.truncate(MAX_CHANNEL_LEN);
        Self {
            channel,
            payload: payload.into(),
        }
    }

    pub fn channel(&self) -> &[u8] {
        &self.channel
    }

    /// Channel name for logging. Non UTF-8 bytes are replaced.
    pub fn channel_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.channel)
    }

    pub fn encoded_len(&self) -> usize {
        ENVELOPE_PREFIX_LEN + self.channel.len() + self.payload.len()
    }

    /// Encode into the wire form.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        encode_header(&self.channel, &mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a wire envelope. The payload is a zero-copy view of `data`.
    pub fn from_bytes(data: Bytes) -> Result<Self> {
        if data.len() < ENVELOPE_PREFIX_LEN {
            return Err(RelayError::MalformedPacket(constants::ERR_TRUNCATED_ENVELOPE));
        }
        if u16::from_be_bytes([data[0], data[1]]) != ENVELOPE_MARKER {
            return Err(RelayError::MalformedPacket(constants::ERR_NOT_AN_ENVELOPE));
        }
        let channel_end = ENVELOPE_PREFIX_LEN + data[2] as usize;
        if data.len() < channel_end {
            return Err(RelayError::MalformedPacket(constants::ERR_TRUNCATED_ENVELOPE));
        }
        Ok(Self {
            channel: data.slice(ENVELOPE_PREFIX_LEN..channel_end),
            payload: data.slice(channel_end..),
        })
    }
}

/// Tokio encoder producing wire envelopes
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = RelayError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.encoded_len());
        encode_header(&item.channel, dst);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
