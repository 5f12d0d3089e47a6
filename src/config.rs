//! # Gateway Server Configuration
//!
//! `GatewayConfig` carries the listener address and the protocol timeouts.
//! Every field has a default, so a JSON config file only needs the values it
//! changes:
//!
//! ```json
//! { "port": 5001, "verify_checksum": false }
//! ```

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_DATA_TIMEOUT_MS,
    DEFAULT_GATEWAY_PORT, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_BUFFER_LEN, MBUS_FRAME_MAX_LENGTH,
};
use crate::error::MBusError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the gateway server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: String,
    pub port: u16,
    /// Inactivity after which a gateway socket is closed.
    pub idle_timeout_ms: u64,
    /// Wait for the response to a command.
    pub command_timeout_ms: u64,
    /// Wait for the data frame after a gateway ACK.
    pub data_timeout_ms: u64,
    /// Drop frames whose checksum does not match.
    pub verify_checksum: bool,
    /// Receive buffer cap per connection.
    pub max_buffer_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_GATEWAY_PORT,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            data_timeout_ms: DEFAULT_DATA_TIMEOUT_MS,
            verify_checksum: true,
            max_buffer_len: DEFAULT_MAX_BUFFER_LEN,
        }
    }
}

impl GatewayConfig {
    /// Loads a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MBusError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MBusError::Config(format!("{}: {e}", path.display())))?;
        let config: GatewayConfig = serde_json::from_str(&text)
            .map_err(|e| MBusError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MBusError> {
        if self.idle_timeout_ms == 0 || self.command_timeout_ms == 0 || self.data_timeout_ms == 0 {
            return Err(MBusError::Config("timeouts must be non-zero".into()));
        }
        if self.max_buffer_len < MBUS_FRAME_MAX_LENGTH {
            return Err(MBusError::Config(format!(
                "max_buffer_len {} cannot hold a full frame",
                self.max_buffer_len
            )));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }
}
