//! # mbus-gateway - A TCP Server for M-Bus Metering Gateways
//!
//! The mbus-gateway crate accepts persistent TCP connections from M-Bus
//! gateways (Orion GSM modems, Wimbus concentrators, Integral gateways),
//! identifies each gateway from the handshake it sends on connect, and lets
//! callers read the utility meters (electricity, gas, water, heat) wired
//! behind it.
//!
//! ## Features
//!
//! - Accept gateway connections and identify them by IMEI, `oriongsm-` or
//!   `integral-` identifier, or 20-digit Wimbus address
//! - Reassemble M-Bus frames (ACK, short, variable length) from a TCP byte
//!   stream, with checksum verification and resynchronization on noise
//! - Send a command to a gateway and wait for its response, one command per
//!   gateway at a time
//! - Read a meter with `REQ_UD2`, following the ACK-then-data pattern of
//!   gateways that acknowledge before forwarding the meter's telegram
//! - Track connection status per gateway and publish lifecycle events
//! - Support for logging and error handling
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mbus-gateway = "1.0.0"
//! ```
//!
//! ```rust,no_run
//! use mbus_gateway::{init_logger, GatewayConfig, GatewayEvent, GatewayServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mbus_gateway::MBusError> {
//!     init_logger();
//!     let server = GatewayServer::new(GatewayConfig::default());
//!     let mut events = server.subscribe();
//!     server.start().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let GatewayEvent::GatewayConnected { device_id, .. } = event {
//!             if let Some(registers) = server.read_meter(&device_id, 1).await {
//!                 for register in registers {
//!                     println!("{} {}", register.value, register.unit);
//!                 }
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod mbus;
pub mod payload;
pub mod util;

pub use crate::config::GatewayConfig;
pub use crate::error::MBusError;
pub use crate::logging::{init_logger, log_info};

pub use gateway::{extract_device_id, GatewayEvent, GatewayInfo, GatewayServer, GatewayStatus};
pub use mbus::{build_read_command, parse_frame, MBusFrame, MBusFrameType};
pub use payload::{decode_frame_registers, decode_registers, RegisterValue};
