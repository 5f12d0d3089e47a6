//! # M-Bus Gateway Error Handling
//!
//! This module defines the MBusError enum, which represents the different error
//! types that can occur in the mbus-gateway crate.

use thiserror::Error;

/// Represents the different error types that can occur in the gateway server.
#[derive(Debug, Error)]
pub enum MBusError {
    /// Indicates an I/O error on a gateway socket.
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Indicates that the listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Indicates an error when parsing an M-Bus frame.
    #[error("Error parsing M-Bus frame: {0}")]
    FrameParseError(String),

    /// Indicates a leading byte that starts no known frame.
    #[error("Unrecognized frame start: 0x{0:02X}")]
    UnrecognizedStart(u8),

    /// Indicates a checksum mismatch (frame corrupt).
    #[error("Invalid checksum: expected {expected}, calculated {calculated}")]
    InvalidChecksum { expected: u8, calculated: u8 },

    /// Indicates user data too long to fit in one variable frame.
    #[error("User data of {0} bytes does not fit in an M-Bus frame")]
    FrameTooLong(usize),

    /// Indicates that no live socket is registered for the device.
    #[error("Device not connected: {0}")]
    DeviceNotConnected(String),

    /// Indicates that the device already has a command in flight.
    #[error("Command already pending for device: {0}")]
    CommandInProgress(String),

    /// Indicates that a command received no response in time.
    #[error("Command to {device_id} timed out after {timeout_ms} ms")]
    CommandTimeout { device_id: String, timeout_ms: u64 },

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string")]
    InvalidHexString,

    /// Indicates an invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A catch‑all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}
