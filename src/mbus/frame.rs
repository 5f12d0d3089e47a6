//! # M-Bus Frame Decoder
//!
//! This module decodes and encodes the EN 13757-3 link layer frames exchanged with
//! metering gateways. It leverages the `nom` crate's streaming parsers so that a
//! partially received frame is reported as incomplete rather than as an error.
//!
//! ## Frame formats
//! - Single character: `E5`
//! - Short frame: `10 C A checksum 16`
//! - Variable frame: `68 L L 68 C A <user data> checksum 16`, where `L` counts
//!   `C`, `A` and the user data.
//!
//! ## Usage
//!
//! ```
//! use mbus_gateway::mbus::frame::{build_read_command, parse_frame, MBusFrameType};
//!
//! let cmd = build_read_command(0x05);
//! assert_eq!(cmd, [0x10, 0x7B, 0x05, 0x80, 0x16]);
//!
//! let (frame, consumed) = parse_frame(&cmd).unwrap().unwrap();
//! assert_eq!(frame.frame_type, MBusFrameType::Short);
//! assert_eq!(consumed, 5);
//! ```

use crate::constants::{
    MBUS_CONTROL_REQ_UD2, MBUS_FRAME_ACK_START, MBUS_FRAME_LONG_START, MBUS_FRAME_SHORT_START,
    MBUS_FRAME_STOP, MBUS_MAX_USER_DATA,
};
use crate::error::MBusError;
use crate::util::hex::decode_hex;
use nom::{
    bytes::streaming::{tag, take},
    error::{Error as NomError, ErrorKind},
    number::streaming::be_u8,
    Err as NomErr, IResult,
};
use serde::Serialize;

/// Represents an M-Bus frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MBusFrame {
    pub frame_type: MBusFrameType,
    /// L field of a variable frame, zero otherwise.
    pub length: u8,
    pub control: u8,
    pub address: u8,
    /// User data of a variable frame (CI field first), empty otherwise.
    pub data: Vec<u8>,
    pub checksum: u8,
    /// The frame exactly as it appeared on the wire.
    pub raw: Vec<u8>,
}

/// Represents the different types of M-Bus frames.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MBusFrameType {
    Ack,
    Short,
    Variable,
}

impl MBusFrame {
    /// Single character acknowledgement.
    pub fn ack() -> Self {
        MBusFrame {
            frame_type: MBusFrameType::Ack,
            length: 0,
            control: 0,
            address: 0,
            data: Vec::new(),
            checksum: 0,
            raw: vec![MBUS_FRAME_ACK_START],
        }
    }

    /// Short frame with a computed checksum.
    pub fn short(control: u8, address: u8) -> Self {
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Short,
            length: 0,
            control,
            address,
            data: Vec::new(),
            checksum: 0,
            raw: Vec::new(),
        };
        frame.checksum = calculate_checksum(&frame);
        frame.raw = encode(&frame, 0);
        frame
    }

    /// Variable frame with a computed checksum. `data` starts with the CI field.
    ///
    /// Fails with [`MBusError::FrameTooLong`] for more than
    /// [`MBUS_MAX_USER_DATA`] bytes.
    pub fn variable(control: u8, address: u8, data: Vec<u8>) -> Result<Self, MBusError> {
        let length = length_field(&data)?;
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Variable,
            length,
            control,
            address,
            data,
            checksum: 0,
            raw: Vec::new(),
        };
        frame.checksum = calculate_checksum(&frame);
        frame.raw = encode(&frame, length);
        Ok(frame)
    }

    pub fn is_ack(&self) -> bool {
        self.frame_type == MBusFrameType::Ack
    }

    /// CI field of a variable frame.
    pub fn control_information(&self) -> Option<u8> {
        match self.frame_type {
            MBusFrameType::Variable => self.data.first().copied(),
            _ => None,
        }
    }
}

/// Parses one frame from the front of `input`.
///
/// Returns `Ok(None)` while the buffer holds only a prefix of a frame,
/// `Ok(Some((frame, consumed)))` once a frame is complete, and an error when
/// the leading bytes cannot start a valid frame. The checksum is extracted but
/// not verified here; see [`verify_frame`].
pub fn parse_frame(input: &[u8]) -> Result<Option<(MBusFrame, usize)>, MBusError> {
    let Some(&start) = input.first() else {
        return Ok(None);
    };

    let result = match start {
        MBUS_FRAME_ACK_START => return Ok(Some((MBusFrame::ack(), 1))),
        MBUS_FRAME_SHORT_START => parse_short_frame(input),
        MBUS_FRAME_LONG_START => parse_variable_frame(input),
        other => return Err(MBusError::UnrecognizedStart(other)),
    };

    match result {
        Ok((remaining, frame)) => Ok(Some((frame, input.len() - remaining.len()))),
        Err(NomErr::Incomplete(_)) => Ok(None),
        Err(NomErr::Error(e)) | Err(NomErr::Failure(e)) => Err(MBusError::FrameParseError(
            format!("{:?} at offset {}", e.code, input.len() - e.input.len()),
        )),
    }
}

/// Parses a hex encoded frame, as typed on a command line. Returns the frame
/// and the number of bytes after it.
pub fn parse_hex_frame(hex: &str) -> Result<(MBusFrame, usize), MBusError> {
    let bytes = decode_hex(hex)?;
    match parse_frame(&bytes)? {
        Some((frame, consumed)) => Ok((frame, bytes.len() - consumed)),
        None => Err(MBusError::FrameParseError(format!(
            "incomplete frame ({} bytes)",
            bytes.len()
        ))),
    }
}

/// Parses a short M-Bus frame.
fn parse_short_frame(input: &[u8]) -> IResult<&[u8], MBusFrame> {
    let (i, _) = tag(&[MBUS_FRAME_SHORT_START][..])(input)?;
    let (i, control) = be_u8(i)?;
    let (i, address) = be_u8(i)?;
    let (i, checksum) = be_u8(i)?;
    let (i, _) = tag(&[MBUS_FRAME_STOP][..])(i)?;
    let raw = input[..input.len() - i.len()].to_vec();
    Ok((
        i,
        MBusFrame {
            frame_type: MBusFrameType::Short,
            length: 0,
            control,
            address,
            data: Vec::new(),
            checksum,
            raw,
        },
    ))
}

/// Parses a variable length M-Bus frame.
fn parse_variable_frame(input: &[u8]) -> IResult<&[u8], MBusFrame> {
    let (i, _) = tag(&[MBUS_FRAME_LONG_START][..])(input)?;
    let (i, length1) = be_u8(i)?;
    let (i, length2) = be_u8(i)?;
    // C and A are mandatory
    if length1 != length2 || length1 < 2 {
        return Err(NomErr::Failure(NomError::new(i, ErrorKind::Verify)));
    }
    let (i, _) = tag(&[MBUS_FRAME_LONG_START][..])(i)?;
    let (i, body) = take(length1 as usize)(i)?;
    let (i, checksum) = be_u8(i)?;
    let (i, _) = tag(&[MBUS_FRAME_STOP][..])(i)?;
    let raw = input[..input.len() - i.len()].to_vec();
    Ok((
        i,
        MBusFrame {
            frame_type: MBusFrameType::Variable,
            length: length1,
            control: body[0],
            address: body[1],
            data: body[2..].to_vec(),
            checksum,
            raw,
        },
    ))
}

/// Offset of the next byte after the first that could start a frame, or the
/// buffer length if there is none.
pub fn resync_offset(input: &[u8]) -> usize {
    input
        .iter()
        .skip(1)
        .position(|b| {
            matches!(
                *b,
                MBUS_FRAME_ACK_START | MBUS_FRAME_SHORT_START | MBUS_FRAME_LONG_START
            )
        })
        .map_or(input.len(), |pos| pos + 1)
}

/// Builds the REQ_UD2 short frame requesting current data from `address`.
pub fn build_read_command(address: u8) -> [u8; 5] {
    [
        MBUS_FRAME_SHORT_START,
        MBUS_CONTROL_REQ_UD2,
        address,
        MBUS_CONTROL_REQ_UD2.wrapping_add(address),
        MBUS_FRAME_STOP,
    ]
}

/// Packs an M-Bus frame into a byte vector.
///
/// The L field is recomputed from `frame.data`; user data longer than
/// [`MBUS_MAX_USER_DATA`] is rejected.
pub fn pack_frame(frame: &MBusFrame) -> Result<Vec<u8>, MBusError> {
    let length = match frame.frame_type {
        MBusFrameType::Variable => length_field(&frame.data)?,
        _ => 0,
    };
    Ok(encode(frame, length))
}

fn length_field(data: &[u8]) -> Result<u8, MBusError> {
    if data.len() > MBUS_MAX_USER_DATA {
        return Err(MBusError::FrameTooLong(data.len()));
    }
    // C and A count towards L
    Ok((data.len() + 2) as u8)
}

fn encode(frame: &MBusFrame, length: u8) -> Vec<u8> {
    let mut data = Vec::with_capacity(frame.data.len() + 8);

    match frame.frame_type {
        MBusFrameType::Ack => {
            data.push(MBUS_FRAME_ACK_START);
        }
        MBusFrameType::Short => {
            data.push(MBUS_FRAME_SHORT_START);
            data.push(frame.control);
            data.push(frame.address);
            data.push(frame.checksum);
            data.push(MBUS_FRAME_STOP);
        }
        MBusFrameType::Variable => {
            data.push(MBUS_FRAME_LONG_START);
            data.push(length);
            data.push(length);
            data.push(MBUS_FRAME_LONG_START);
            data.push(frame.control);
            data.push(frame.address);
            data.extend_from_slice(&frame.data);
            data.push(frame.checksum);
            data.push(MBUS_FRAME_STOP);
        }
    }

    data
}

/// Verifies the integrity of an M-Bus frame.
pub fn verify_frame(frame: &MBusFrame) -> Result<(), MBusError> {
    let calculated_checksum = calculate_checksum(frame);
    if frame.checksum != calculated_checksum {
        return Err(MBusError::InvalidChecksum {
            expected: frame.checksum,
            calculated: calculated_checksum,
        });
    }
    Ok(())
}

/// Calculates the checksum of an M-Bus frame: the arithmetic sum of C, A and
/// the user data, modulo 256.
pub fn calculate_checksum(frame: &MBusFrame) -> u8 {
    match frame.frame_type {
        MBusFrameType::Ack => 0,
        MBusFrameType::Short => frame.control.wrapping_add(frame.address),
        MBusFrameType::Variable => frame
            .data
            .iter()
            .fold(frame.control.wrapping_add(frame.address), |acc, b| {
                acc.wrapping_add(*b)
            }),
    }
}
