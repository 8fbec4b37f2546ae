#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};
use telemetry_relay::config::RelayConfig;
use telemetry_relay::service::RelayService;

fuzz_target!(|data: &[u8]| {
    // Split the input into datagrams on 0xFF and feed them through the relay
    let mut service = RelayService::new(&RelayConfig::default());
    let start = Instant::now();
    for (i, datagram) in data.split(|&b| b == 0xFF).enumerate() {
        let now = start + Duration::from_millis(i as u64 * 50);
        let _ = service.handle_datagram_at(Bytes::copy_from_slice(datagram), now);
    }
    assert!(service.reassembler().pending() <= data.len() + 1);
});
