//! Gateway identifier extraction from handshake bytes.
//!
//! Gateways announce themselves with an ASCII identifier at the start of the
//! stream. The supported forms, tried in this order, are:
//!
//! 1. a 15 digit IMEI (Orion GSM modems),
//! 2. `oriongsm-<digits>`,
//! 3. `integral-<digits>`,
//! 4. a 20 hex digit Wimbus gateway address.
//!
//! Digit and hex runs must be exactly the expected length; a longer run of
//! the same class does not match.

use crate::constants::{
    HANDSHAKE_WINDOW, IMEI_DIGITS, INTEGRAL_PREFIX, ORION_GSM_PREFIX, WIMBUS_ADDRESS_DIGITS,
};
use std::ops::Range;

/// Returns the device identifier found in the first bytes of `buffer`.
pub fn extract_device_id(buffer: &[u8]) -> Option<String> {
    locate_device_id(buffer).map(|range| String::from_utf8_lossy(&buffer[range]).into_owned())
}

/// Byte range of the device identifier within `buffer`.
pub fn locate_device_id(buffer: &[u8]) -> Option<Range<usize>> {
    let window = &buffer[..buffer.len().min(HANDSHAKE_WINDOW)];

    find_run(window, IMEI_DIGITS, |b| b.is_ascii_digit())
        .or_else(|| find_prefixed(window, ORION_GSM_PREFIX))
        .or_else(|| find_prefixed(window, INTEGRAL_PREFIX))
        .or_else(|| find_run(window, WIMBUS_ADDRESS_DIGITS, |b| b.is_ascii_hexdigit()))
}

/// First maximal run of bytes matching `class` that is exactly `len` long.
fn find_run(window: &[u8], len: usize, class: impl Fn(u8) -> bool) -> Option<Range<usize>> {
    let mut start = 0;
    while start < window.len() {
        if !class(window[start]) {
            start += 1;
            continue;
        }
        let end = window[start..]
            .iter()
            .position(|b| !class(*b))
            .map_or(window.len(), |n| start + n);
        if end - start == len {
            return Some(start..end);
        }
        start = end;
    }
    None
}

/// `prefix` followed by one or more decimal digits.
fn find_prefixed(window: &[u8], prefix: &str) -> Option<Range<usize>> {
    let prefix = prefix.as_bytes();
    window
        .windows(prefix.len())
        .enumerate()
        .filter(|(_, candidate)| *candidate == prefix)
        .find_map(|(at, _)| {
            let digits_start = at + prefix.len();
            let digits = window[digits_start..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            (digits > 0).then(|| at..digits_start + digits)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_imei() {
        assert_eq!(
            extract_device_id(b"356938035643809\r\n").as_deref(),
            Some("356938035643809")
        );
    }

    #[test]
    fn test_imei_wins_over_prefix() {
        assert_eq!(
            extract_device_id(b"oriongsm-123456789012345").as_deref(),
            Some("123456789012345")
        );
    }

    #[test]
    fn test_sixteen_digits_is_not_an_imei() {
        assert_eq!(extract_device_id(b"1234567890123456 "), None);
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(
            extract_device_id(b"oriongsm-42\x10\x7B\x01").as_deref(),
            Some("oriongsm-42")
        );
        assert_eq!(
            extract_device_id(b"ID:integral-7 ready").as_deref(),
            Some("integral-7")
        );
        assert_eq!(extract_device_id(b"integral- no digits"), None);
    }

    #[test]
    fn test_wimbus_address() {
        assert_eq!(
            extract_device_id(b"A1B2C3D4E5F60718293A\n").as_deref(),
            Some("A1B2C3D4E5F60718293A")
        );
    }

    #[test]
    fn test_window_limit() {
        let mut buf = vec![b' '; 30];
        buf.extend_from_slice(b"356938035643809");
        assert_eq!(extract_device_id(&buf), None);
    }

    proptest! {
        #[test]
        fn extraction_is_deterministic_substring(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let first = locate_device_id(&data);
            prop_assert_eq!(first.clone(), locate_device_id(&data));
            if let Some(range) = first {
                prop_assert!(range.end <= HANDSHAKE_WINDOW.min(data.len()));
            }
        }
    }
}
