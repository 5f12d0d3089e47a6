#![no_main]

use libfuzzer_sys::fuzz_target;
use mbus_gateway::gateway::connection::ConnectionState;
use std::net::SocketAddr;

fuzz_target!(|data: &[u8]| {
    let mut state = ConnectionState::new(SocketAddr::from(([127, 0, 0, 1], 5000)), 512, true);

    // Feed the input in uneven chunks, as a socket would deliver it
    for chunk in data.chunks(7) {
        let ingest = state.ingest(chunk);
        for frame in ingest.frames {
            assert!(!frame.raw.is_empty());
        }
        assert!(state.buffered().len() <= 512);
    }
});
