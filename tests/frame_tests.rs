//! Integration tests for the `frame.rs` module: parsing, packing and verification of the M-Bus
//! frames gateways send over TCP.

use mbus_gateway::error::MBusError;
use mbus_gateway::mbus::frame::{
    build_read_command, calculate_checksum, pack_frame, parse_frame, resync_offset, verify_frame,
    MBusFrame, MBusFrameType,
};

const LONG_FRAME: [u8; 14] = [
    0x68, 0x08, 0x08, 0x68, 0x53, 0x01, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x63, 0x16,
];

/// Tests that an ACK frame is correctly parsed.
#[test]
fn test_parse_ack_frame() {
    let (frame, consumed) = parse_frame(&[0xE5]).unwrap().unwrap();
    assert_eq!(frame.frame_type, MBusFrameType::Ack);
    assert_eq!(frame.control, 0);
    assert_eq!(frame.address, 0);
    assert_eq!(frame.data, Vec::<u8>::new());
    assert_eq!(frame.raw, vec![0xE5]);
    assert_eq!(consumed, 1);
}

/// Tests that a Short frame is correctly parsed.
#[test]
fn test_parse_short_frame() {
    let frame_data = [0x10, 0x53, 0x01, 0x54, 0x16];
    let (frame, consumed) = parse_frame(&frame_data).unwrap().unwrap();
    assert_eq!(frame.frame_type, MBusFrameType::Short);
    assert_eq!(frame.control, 0x53);
    assert_eq!(frame.address, 0x01);
    assert_eq!(frame.checksum, 0x54);
    assert_eq!(frame.control_information(), None);
    assert_eq!(consumed, 5);
}

/// Tests that a variable frame with only a CI field is correctly parsed.
#[test]
fn test_parse_control_frame() {
    let frame_data = [0x68, 0x03, 0x03, 0x68, 0x53, 0x01, 0x00, 0x54, 0x16];
    let (frame, _) = parse_frame(&frame_data).unwrap().unwrap();
    assert_eq!(frame.frame_type, MBusFrameType::Variable);
    assert_eq!(frame.length, 3);
    assert_eq!(frame.control_information(), Some(0x00));
    assert_eq!(frame.data, vec![0x00]);
}

/// Tests that a Long frame is correctly parsed.
#[test]
fn test_parse_long_frame() {
    let (frame, consumed) = parse_frame(&LONG_FRAME).unwrap().unwrap();
    assert_eq!(frame.frame_type, MBusFrameType::Variable);
    assert_eq!(frame.control, 0x53);
    assert_eq!(frame.address, 0x01);
    assert_eq!(frame.data, vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
    assert_eq!(frame.checksum, 0x63);
    assert_eq!(frame.raw, LONG_FRAME.to_vec());
    assert_eq!(consumed, LONG_FRAME.len());
    assert!(verify_frame(&frame).is_ok());
}

/// Tests that bytes after a complete frame are left for the next parse.
#[test]
fn test_parse_reports_consumed_length() {
    let mut buffer = LONG_FRAME.to_vec();
    buffer.extend_from_slice(&[0xE5, 0x10]);

    let (_, consumed) = parse_frame(&buffer).unwrap().unwrap();
    assert_eq!(consumed, LONG_FRAME.len());

    let rest = &buffer[consumed..];
    let (frame, consumed) = parse_frame(rest).unwrap().unwrap();
    assert!(frame.is_ack());
    assert_eq!(parse_frame(&rest[consumed..]).unwrap(), None);
}

/// Tests that every strict prefix of a frame is reported incomplete.
#[test]
fn test_prefixes_are_incomplete() {
    for end in 0..LONG_FRAME.len() {
        assert_eq!(parse_frame(&LONG_FRAME[..end]).unwrap(), None, "prefix {end}");
    }
    let short = build_read_command(0x05);
    for end in 0..short.len() {
        assert_eq!(parse_frame(&short[..end]).unwrap(), None, "prefix {end}");
    }
}

/// Tests that an unknown leading byte is an error, not an incomplete frame.
#[test]
fn test_parse_unrecognized_start() {
    let result = parse_frame(&[0x41, 0x54, 0x0D]);
    assert!(matches!(result, Err(MBusError::UnrecognizedStart(0x41))));
}

/// Tests that mismatched length fields are rejected.
#[test]
fn test_parse_length_mismatch() {
    let frame_data = [0x68, 0x08, 0x09, 0x68, 0x53, 0x01];
    assert!(matches!(
        parse_frame(&frame_data),
        Err(MBusError::FrameParseError(_))
    ));
}

/// Tests that a wrong second start byte or stop byte is rejected.
#[test]
fn test_parse_bad_delimiters() {
    let mut frame_data = LONG_FRAME;
    frame_data[3] = 0x69;
    assert!(parse_frame(&frame_data).is_err());

    let mut frame_data = LONG_FRAME;
    frame_data[13] = 0x17;
    assert!(parse_frame(&frame_data).is_err());

    assert!(parse_frame(&[0x10, 0x7B, 0x05, 0x80, 0x00]).is_err());
}

/// Tests that the parser extracts a wrong checksum and verification catches it.
#[test]
fn test_verify_detects_corruption() {
    let mut frame_data = LONG_FRAME;
    frame_data[8] ^= 0x01;
    let (frame, _) = parse_frame(&frame_data).unwrap().unwrap();
    assert!(matches!(
        verify_frame(&frame),
        Err(MBusError::InvalidChecksum {
            expected: 0x63,
            calculated: 0x64
        })
    ));
}

/// Tests that the REQ_UD2 command matches the wire layout.
#[test]
fn test_build_read_command() {
    assert_eq!(build_read_command(0x05), [0x10, 0x7B, 0x05, 0x80, 0x16]);
    assert_eq!(build_read_command(0x00), [0x10, 0x7B, 0x00, 0x7B, 0x16]);
    assert_eq!(build_read_command(0xFA), [0x10, 0x7B, 0xFA, 0x75, 0x16]);
}

/// Tests that packing a frame round-trips through the parser.
#[test]
fn test_pack_frame() {
    let frame = MBusFrame::variable(0x08, 0x05, vec![0x72, 0x03, 0x06, 0x10, 0x27, 0x00])
        .unwrap();
    assert_eq!(frame.checksum, calculate_checksum(&frame));
    assert_eq!(pack_frame(&frame).unwrap(), frame.raw);

    let (parsed, _) = parse_frame(&frame.raw).unwrap().unwrap();
    assert_eq!(parsed, frame);
    assert_eq!(parsed.control_information(), Some(0x72));

    let short = MBusFrame::short(0x7B, 0x05);
    assert_eq!(short.raw, build_read_command(0x05).to_vec());
}

/// Tests that resynchronization skips to the next plausible start byte.
#[test]
fn test_resync_offset() {
    assert_eq!(resync_offset(&[0x00, 0x01, 0x68, 0x03]), 2);
    assert_eq!(resync_offset(&[0x68, 0x10]), 1);
    assert_eq!(resync_offset(&[0x41, 0x42, 0xE5]), 2);
    assert_eq!(resync_offset(&[0x41, 0x42, 0x43]), 3);
}
