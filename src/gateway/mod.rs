//! The gateway module contains the TCP side of the crate: the server that
//! accepts gateway connections, the per-socket protocol state, device
//! identification, the connection registry and request/response correlation.

pub mod connection;
pub mod correlator;
pub mod events;
pub mod identifier;
pub mod registry;
pub mod server;

pub use events::GatewayEvent;
pub use identifier::extract_device_id;
pub use registry::{GatewayInfo, GatewayStatus};
pub use server::GatewayServer;
