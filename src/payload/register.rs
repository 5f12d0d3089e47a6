//! # Register Decoder
//!
//! Walks the user data of a variable frame and extracts DIF/VIF tagged numeric
//! registers. Only the storage width (DIF low bits) and the unit family of the
//! primary VIF are interpreted; everything else is passed through raw.

use crate::constants::{MBUS_DATA_RECORD_DIF_MASK_LENGTH, MBUS_DIB_VIF_WITHOUT_EXTENSION};
use crate::mbus::frame::{MBusFrame, MBusFrameType};
use serde::Serialize;

/// Unit reported for VIF codes outside the unit table.
pub const UNKNOWN_UNIT: &str = "unknown";

/// A decoded numeric register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterValue {
    pub dif: u8,
    pub vif: u8,
    pub value: u64,
    pub unit: &'static str,
}

// (first code, last code, unit), codes are VIF & 0x7F
const VIF_UNITS: &[(u8, u8, &str)] = &[
    (0x00, 0x02, "Wh"),
    (0x03, 0x05, "kWh"),
    (0x06, 0x07, "MWh"),
    (0x10, 0x12, "m³"),
    (0x13, 0x17, "L"),
    (0x58, 0x5F, "°C"),
];

/// Maps a VIF to its unit, ignoring the extension bit.
pub fn unit_for_vif(vif: u8) -> &'static str {
    let code = vif & MBUS_DIB_VIF_WITHOUT_EXTENSION;
    VIF_UNITS
        .iter()
        .find(|(first, last, _)| (*first..=*last).contains(&code))
        .map_or(UNKNOWN_UNIT, |(_, _, unit)| *unit)
}

/// Iterator over the registers of a data payload.
///
/// The walk depends only on the slice, so a fresh iterator over the same data
/// yields the same registers.
#[derive(Debug, Clone)]
pub struct RegisterIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> RegisterIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        RegisterIter { data, offset: 0 }
    }
}

impl Iterator for RegisterIter<'_> {
    type Item = RegisterValue;

    fn next(&mut self) -> Option<RegisterValue> {
        // A record needs DIF, VIF and at least two more bytes of slack
        if self.offset + 3 >= self.data.len() {
            return None;
        }

        let dif = self.data[self.offset];
        let vif = self.data[self.offset + 1];
        let width = (dif & MBUS_DATA_RECORD_DIF_MASK_LENGTH) as usize;
        let start = self.offset + 2;

        let Some(bytes) = self.data.get(start..start + width) else {
            // Truncated record, discard the remainder
            self.offset = self.data.len();
            return None;
        };

        let value = bytes
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)));

        self.offset = start + width;
        Some(RegisterValue {
            dif,
            vif,
            value,
            unit: unit_for_vif(vif),
        })
    }
}

/// Decodes all registers of a data payload.
pub fn decode_registers(data: &[u8]) -> Vec<RegisterValue> {
    RegisterIter::new(data).collect()
}

/// Decodes the registers of a variable frame, `None` for frames without user data.
pub fn decode_frame_registers(frame: &MBusFrame) -> Option<Vec<RegisterValue>> {
    match frame.frame_type {
        MBusFrameType::Variable => Some(decode_registers(&frame.data)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_table_boundaries() {
        assert_eq!(unit_for_vif(0x00), "Wh");
        assert_eq!(unit_for_vif(0x02), "Wh");
        assert_eq!(unit_for_vif(0x03), "kWh");
        assert_eq!(unit_for_vif(0x07), "MWh");
        assert_eq!(unit_for_vif(0x08), UNKNOWN_UNIT);
        assert_eq!(unit_for_vif(0x13), "L");
        assert_eq!(unit_for_vif(0x5F), "°C");
        assert_eq!(unit_for_vif(0x86), "MWh");
    }

    #[test]
    fn test_three_byte_energy() {
        let regs = decode_registers(&[0x03, 0x06, 0x10, 0x27, 0x00]);
        assert_eq!(
            regs,
            vec![RegisterValue {
                dif: 0x03,
                vif: 0x06,
                value: 10000,
                unit: "kWh"
            }]
        );
    }

    #[test]
    fn test_truncated_record_stops() {
        let regs = decode_registers(&[0x01, 0x13, 0x05, 0x04, 0x13, 0x01, 0x02]);
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].value, 5);
    }

    #[test]
    fn test_iterator_restarts_from_slice() {
        let data = [0x02, 0x5A, 0xD2, 0x00, 0x00];
        assert_eq!(RegisterIter::new(&data).count(), 1);
        assert_eq!(RegisterIter::new(&data).count(), 1);
    }

    #[test]
    fn test_short_frame_has_no_registers() {
        assert!(decode_frame_registers(&MBusFrame::short(0x7B, 1)).is_none());
    }
}
