//! Integration tests for gateway identification from handshake bytes.

use mbus_gateway::extract_device_id;
use mbus_gateway::gateway::identifier::locate_device_id;

/// Tests the handshakes sent by the supported gateway families.
#[test]
fn test_known_handshakes() {
    let cases: [(&[u8], &str); 4] = [
        (b"867648042131574\r\n", "867648042131574"),
        (b"oriongsm-000125\r\n", "oriongsm-000125"),
        (b"integral-98765\r\n", "integral-98765"),
        (b"0123456789abcdef0123\r\n", "0123456789abcdef0123"),
    ];
    for (handshake, expected) in cases {
        assert_eq!(extract_device_id(handshake).as_deref(), Some(expected));
    }
}

/// Tests that the IMEI form has priority over the prefixed forms.
#[test]
fn test_priority_order() {
    assert_eq!(
        extract_device_id(b"integral-1 867648042131574").as_deref(),
        Some("867648042131574")
    );
    assert_eq!(
        extract_device_id(b"integral-5 oriongsm-6").as_deref(),
        Some("oriongsm-6")
    );
}

/// Tests that buffers without an identifier yield nothing.
#[test]
fn test_no_identifier() {
    assert_eq!(extract_device_id(b""), None);
    assert_eq!(extract_device_id(b"AT+CREG?\r\nOK\r\n"), None);
    assert_eq!(extract_device_id(&[0x68, 0x03, 0x03, 0x68, 0x08, 0x01, 0x72]), None);
}

/// Tests that the located range covers exactly the identifier bytes.
#[test]
fn test_locate_range() {
    let buffer = b"\r\nintegral-42\r\n\xE5";
    let range = locate_device_id(buffer).unwrap();
    assert_eq!(&buffer[range.clone()], b"integral-42");
    assert_eq!(range.end, 13);
}

/// Tests that extraction is repeatable on a growing buffer.
#[test]
fn test_growing_buffer() {
    let handshake = b"oriongsm-31337 hello";
    assert_eq!(extract_device_id(&handshake[..9]), None);
    for end in 10..=handshake.len() {
        let id = extract_device_id(&handshake[..end]).unwrap();
        assert!(id.starts_with("oriongsm-3"));
        assert_eq!(extract_device_id(&handshake[..end]), Some(id));
    }
}
