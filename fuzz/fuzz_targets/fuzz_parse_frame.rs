#![no_main]

use libfuzzer_sys::fuzz_target;
use mbus_gateway::mbus::frame::{parse_frame, verify_frame};
use mbus_gateway::payload::register::decode_frame_registers;

fuzz_target!(|data: &[u8]| {
    // The parser must never panic and never claim more bytes than it was given
    if let Ok(Some((frame, consumed))) = parse_frame(data) {
        assert!(consumed <= data.len());
        assert_eq!(frame.raw, &data[..consumed]);
        let _ = verify_frame(&frame);
        let _ = decode_frame_registers(&frame);
    }

    // Test length field consistency on variable frames
    if data.len() >= 6 && data[0] == 0x68 {
        let mut mutated = data.to_vec();
        mutated[1] = (data.len() as u8).wrapping_sub(6);
        mutated[2] = mutated[1];
        let _ = parse_frame(&mutated);
    }
});
