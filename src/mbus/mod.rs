//! The mbus module contains the wired M-Bus frame layer: parsing, packing
//! and checksum verification of ACK, short and variable length frames.

pub mod frame;

pub use frame::*;

/// Represents an M-Bus frame.
pub use frame::MBusFrame;

/// Represents the different types of M-Bus frames.
pub use frame::MBusFrameType;
