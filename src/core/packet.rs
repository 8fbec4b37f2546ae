//! Datagram classification and header parsing.
//!
//! A datagram is classified once, by its leading 2-byte magic, into a
//! [`Frame`]:
//!
//! ```text
//! 0x81D9 ...                                   -> Frame::Envelope (already normalized)
//! 0x4C43 0x3032 [seq(4)] channel\0 payload     -> Frame::Single
//! 0x4C43 0x3033 [seq(4)] [total(4)] [offset(4)]
//!               [index(2)] [count(2)] payload  -> Frame::Fragment
//! ```
//!
//! All multi-byte fields are big-endian. Payloads are zero-copy slices of
//! the datagram.

use crate::core::envelope::{encode_header, truncate_channel, Envelope, ENVELOPE_MARKER};
use crate::core::reassembly::FragmentSetKey;
use crate::error::{constants, RelayError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Primary magic of the framed telemetry protocol ("LC").
pub const FRAMED_MAGIC: u16 = 0x4C43;

/// Sub-type of a message carried in one datagram ("02").
pub const SUBTYPE_SINGLE: u16 = 0x3032;

/// Sub-type of one fragment of a larger message ("03").
pub const SUBTYPE_FRAGMENT: u16 = 0x3033;

/// Bytes before the channel name of a single message.
pub const SINGLE_HEADER_LEN: usize = 8;

/// Bytes before the payload of a fragment.
pub const FRAGMENT_HEADER_LEN: usize = 20;

/// A message that fit in one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleMessage {
    pub sequence_id: u32,
    pub envelope: Envelope,
}

/// One piece of a multi-datagram message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub key: FragmentSetKey,
    /// Total message length announced by the producer. Informational only.
    pub total_length: u32,
    /// Byte offset of this fragment. Informational only.
    pub byte_offset: u32,
    pub index: u16,
    /// Chunk ready for concatenation. For index 0 it already carries the
    /// envelope header.
    pub chunk: Bytes,
}

/// Decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Already in envelope form; forwarded untouched.
    Envelope(Bytes),
    Single(SingleMessage),
    Fragment(Fragment),
}

/// Classify and parse one datagram.
pub fn decode(datagram: Bytes) -> Result<Frame> {
    if datagram.len() < 2 {
        return Err(RelayError::MalformedPacket(constants::ERR_TRUNCATED_MAGIC));
    }
    match u16::from_be_bytes([datagram[0], datagram[1]]) {
        ENVELOPE_MARKER => Ok(Frame::Envelope(datagram)),
        FRAMED_MAGIC => decode_framed(datagram),
        other => Err(RelayError::UnknownMagic(other)),
    }
}

fn decode_framed(datagram: Bytes) -> Result<Frame> {
    if datagram.len() < 4 {
        return Err(RelayError::MalformedPacket(constants::ERR_TRUNCATED_SUBTYPE));
    }
    match u16::from_be_bytes([datagram[2], datagram[3]]) {
        SUBTYPE_SINGLE => decode_single(datagram).map(Frame::Single),
        SUBTYPE_FRAGMENT => decode_fragment(datagram).map(Frame::Fragment),
        other => Err(RelayError::UnknownSubtype(other)),
    }
}

fn decode_single(datagram: Bytes) -> Result<SingleMessage> {
    if datagram.len() < SINGLE_HEADER_LEN {
        return Err(RelayError::MalformedPacket(constants::ERR_TRUNCATED_SINGLE));
    }
    let mut header = &datagram[4..SINGLE_HEADER_LEN];
    let sequence_id = header.get_u32();

    let (channel, payload) = split_channel(&datagram, SINGLE_HEADER_LEN)?;
    Ok(SingleMessage {
        sequence_id,
        envelope: Envelope::new(channel, payload),
    })
}

fn decode_fragment(datagram: Bytes) -> Result<Fragment> {
    if datagram.len() < FRAGMENT_HEADER_LEN {
        return Err(RelayError::MalformedPacket(constants::ERR_TRUNCATED_FRAGMENT));
    }
    let mut header = &datagram[4..FRAGMENT_HEADER_LEN];
    let sequence_id = header.get_u32();
    let total_length = header.get_u32();
    let byte_offset = header.get_u32();
    let index = header.get_u16();
    let fragment_count = header.get_u16();

    if fragment_count == 0 {
        return Err(RelayError::MalformedPacket(constants::ERR_ZERO_FRAGMENT_COUNT));
    }
    if index >= fragment_count {
        return Err(RelayError::MalformedPacket(constants::ERR_FRAGMENT_INDEX_RANGE));
    }

    let chunk = if index == 0 {
        let (channel, first) = split_channel(&datagram, FRAGMENT_HEADER_LEN)?;
        let channel = truncate_channel(&channel);
        let mut buf = BytesMut::with_capacity(3 + channel.len() + first.len());
        encode_header(channel, &mut buf);
        buf.put_slice(&first);
        buf.freeze()
    } else {
        datagram.slice(FRAGMENT_HEADER_LEN..)
    };

    Ok(Fragment {
        key: FragmentSetKey::new(sequence_id, fragment_count),
        total_length,
        byte_offset,
        index,
        chunk,
    })
}

/// Split `datagram[start..]` at the first NUL into (channel, rest).
fn split_channel(datagram: &Bytes, start: usize) -> Result<(Bytes, Bytes)> {
    let nul = datagram[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(RelayError::MalformedPacket(
            constants::ERR_MISSING_CHANNEL_TERMINATOR,
        ))?;
    let channel_end = start + nul;
    Ok((
        datagram.slice(start..channel_end),
        datagram.slice(channel_end + 1..),
    ))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    fn single(seq: u32, channel: &[u8], payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(FRAMED_MAGIC);
        buf.put_u16(SUBTYPE_SINGLE);
        buf.put_u32(seq);
        buf.put_slice(channel);
        buf.put_u8(0);
        buf.put_slice(payload);
        buf.freeze()
    }

    #[test]
    fn test_single_message() {
        let frame = decode(single(7, b"pose", &[0xAA, 0xBB])).unwrap();
        let Frame::Single(msg) = frame else {
            panic!("expected single message, got {frame:?}");
        };
        assert_eq!(msg.sequence_id, 7);
        assert_eq!(msg.envelope.channel(), b"pose");
        assert_eq!(
            msg.envelope.to_bytes().as_ref(),
            &[0x81, 0xD9, 0x04, 0x70, 0x6F, 0x73, 0x65, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_payload_may_contain_nul() {
        let frame = decode(single(1, b"a", &[0, 0, 1])).unwrap();
        let Frame::Single(msg) = frame else {
            panic!("expected single message");
        };
        assert_eq!(msg.envelope.payload.as_ref(), &[0, 0, 1]);
    }

    #[test]
    fn test_envelope_passthrough_is_untouched() {
        let raw = Bytes::from_static(&[0x81, 0xD9, 0x01, b'x', 0x10]);
        assert_eq!(decode(raw.clone()).unwrap(), Frame::Envelope(raw));
    }

    #[test]
    fn test_fragment_zero_gets_envelope_header() {
        let mut buf = BytesMut::new();
        buf.put_u16(FRAMED_MAGIC);
        buf.put_u16(SUBTYPE_FRAGMENT);
        buf.put_u32(42);
        buf.put_u32(7);
        buf.put_u32(0);
        buf.put_u16(0);
        buf.put_u16(2);
        buf.put_slice(b"cam\0");
        buf.put_u8(0x01);

        let Frame::Fragment(frag) = decode(buf.freeze()).unwrap() else {
            panic!("expected fragment");
        };
        assert_eq!(frag.key, FragmentSetKey::new(42, 2));
        assert_eq!(frag.total_length, 7);
        assert_eq!(frag.index, 0);
        assert_eq!(frag.chunk.as_ref(), &[0x81, 0xD9, 0x03, b'c', b'a', b'm', 0x01]);
    }

    #[test]
    fn test_unknown_subtype() {
        let raw = Bytes::from_static(&[0x4C, 0x43, 0x30, 0x34, 0, 0, 0, 0]);
        assert!(matches!(decode(raw), Err(RelayError::UnknownSubtype(0x3034))));
    }

    #[test]
    fn test_missing_terminator() {
        let raw = Bytes::from_static(&[0x4C, 0x43, 0x30, 0x32, 0, 0, 0, 1, b'a', b'b']);
        assert!(matches!(decode(raw), Err(RelayError::MalformedPacket(_))));
    }
}
