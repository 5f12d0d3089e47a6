//! The payload module decodes the application data carried in variable
//! length frames into register values.

pub mod register;

pub use register::{decode_frame_registers, decode_registers, unit_for_vif, RegisterValue};
