#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use telemetry_relay::core::envelope::Envelope;
use telemetry_relay::core::packet::{decode, Frame};

fuzz_target!(|data: &[u8]| {
    // Datagram decoding must never panic, whatever arrives on the wire
    match decode(Bytes::copy_from_slice(data)) {
        Ok(Frame::Single(msg)) => {
            let _ = Envelope::from_bytes(msg.envelope.to_bytes());
        }
        Ok(Frame::Fragment(frag)) => assert!(frag.index < frag.key.fragment_count),
        Ok(Frame::Envelope(_)) | Err(_) => {}
    }
});
