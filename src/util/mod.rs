//! # Utility Modules
//!
//! Hex encoding/decoding and logging helpers shared by the gateway server
//! and the command line tool.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, encode_hex_upper, format_hex_compact, HexError};
pub use logging::{log_frame_hex, LogThrottle};
