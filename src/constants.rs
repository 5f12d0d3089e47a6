//! M-Bus Gateway Constants
//!
//! This module defines constants used by the gateway server, based on the
//! EN 13757-3 link layer and the behaviour of the metering gateways it serves.

// ----------------------------------------------------------------------------
// Frame delimiters
// ----------------------------------------------------------------------------

/// Single character acknowledgement
pub const MBUS_FRAME_ACK_START: u8 = 0xE5;

/// Short frame start
pub const MBUS_FRAME_SHORT_START: u8 = 0x10;

/// Long/control (variable length) frame start
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Frame stop
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// Bytes of a variable frame not covered by the L field:
/// start, L, L, start, checksum, stop
pub const MBUS_FRAME_LONG_OVERHEAD: usize = 6;

/// Longest possible frame (L = 255)
pub const MBUS_FRAME_MAX_LENGTH: usize = 255 + MBUS_FRAME_LONG_OVERHEAD;

/// Most user data one variable frame can carry (L = 255 minus C and A)
pub const MBUS_MAX_USER_DATA: usize = 253;

// ----------------------------------------------------------------------------
// Control codes
// ----------------------------------------------------------------------------

/// REQ_UD2 with FCB set, as sent by the gateway server
pub const MBUS_CONTROL_REQ_UD2: u8 = 0x7B;

// ----------------------------------------------------------------------------
// Data record constants
// ----------------------------------------------------------------------------

/// DIF mask for the data field width
pub const MBUS_DATA_RECORD_DIF_MASK_LENGTH: u8 = 0x07;

/// VIF without extension
pub const MBUS_DIB_VIF_WITHOUT_EXTENSION: u8 = 0x7F;

// ----------------------------------------------------------------------------
// Server defaults
// ----------------------------------------------------------------------------

/// Default listening port
pub const DEFAULT_GATEWAY_PORT: u16 = 5000;

/// Default bind address
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Socket idle timeout before a forced close
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 300_000;

/// Time to wait for the response to a command
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 15_000;

/// Time to wait for the data frame after a gateway ACK
pub const DEFAULT_DATA_TIMEOUT_MS: u64 = 10_000;

/// Receive buffer cap per connection
pub const DEFAULT_MAX_BUFFER_LEN: usize = 4096;

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ----------------------------------------------------------------------------
// Handshake
// ----------------------------------------------------------------------------

/// Minimum buffered bytes before identifier extraction is attempted
pub const MIN_HANDSHAKE_LEN: usize = 15;

/// Number of leading bytes searched for an identifier
pub const HANDSHAKE_WINDOW: usize = 30;

/// Quiet time after which an identifier at the end of the buffer is taken
/// as complete
pub const HANDSHAKE_SETTLE_MS: u64 = 500;

/// Digits in an IMEI
pub const IMEI_DIGITS: usize = 15;

/// Hex digits in a Wimbus gateway address
pub const WIMBUS_ADDRESS_DIGITS: usize = 20;

/// Orion GSM gateway identifier prefix
pub const ORION_GSM_PREFIX: &str = "oriongsm-";

/// Integral gateway identifier prefix
pub const INTEGRAL_PREFIX: &str = "integral-";
