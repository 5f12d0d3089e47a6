//! Connection registry: live sockets per device and the status history of
//! every device ever seen.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, Notify};

/// Write side of a gateway socket, shared between the connection task and
/// command senders.
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Last known state of a gateway. Kept across reconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub connected: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_disconnect: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub port: Option<u16>,
}

/// A status record annotated with its device id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayInfo {
    pub device_id: String,
    #[serde(flatten)]
    pub status: GatewayStatus,
}

/// The registered socket of an identified gateway.
pub struct LiveConnection {
    pub conn_id: u64,
    pub peer: SocketAddr,
    pub writer: SharedWriter,
    pub close: Arc<Notify>,
}

#[derive(Default)]
pub struct Registry {
    // every open socket, identified or not
    sockets: HashMap<u64, Arc<Notify>>,
    live: HashMap<String, LiveConnection>,
    status: HashMap<String, GatewayStatus>,
}

impl Registry {
    pub fn track(&mut self, conn_id: u64, close: Arc<Notify>) {
        self.sockets.insert(conn_id, close);
    }

    pub fn untrack(&mut self, conn_id: u64) {
        self.sockets.remove(&conn_id);
    }

    pub fn open_sockets(&self) -> usize {
        self.sockets.len()
    }

    /// Registers `conn` for `device_id`, returning the connection it replaced.
    pub fn register(&mut self, device_id: &str, conn: LiveConnection) -> Option<LiveConnection> {
        let status = self.status.entry(device_id.to_string()).or_default();
        status.connected = true;
        status.last_seen = Some(Utc::now());
        status.ip = Some(conn.peer.ip().to_string());
        status.port = Some(conn.peer.port());
        self.live.insert(device_id.to_string(), conn)
    }

    /// Removes the live entry of `device_id` if it still belongs to `conn_id`.
    pub fn unregister(&mut self, device_id: &str, conn_id: u64) -> bool {
        match self.live.get(device_id) {
            Some(conn) if conn.conn_id == conn_id => {
                self.live.remove(device_id);
                self.mark_disconnected(device_id);
                true
            }
            _ => false,
        }
    }

    /// Refreshes `last_seen` if `conn_id` is still the live socket of
    /// `device_id`. Returns false for a socket that was replaced or closed.
    pub fn touch(&mut self, device_id: &str, conn_id: u64) -> bool {
        if !self
            .live
            .get(device_id)
            .is_some_and(|conn| conn.conn_id == conn_id)
        {
            return false;
        }
        if let Some(status) = self.status.get_mut(device_id) {
            status.last_seen = Some(Utc::now());
        }
        true
    }

    pub fn writer(&self, device_id: &str) -> Option<SharedWriter> {
        self.live.get(device_id).map(|conn| conn.writer.clone())
    }

    pub fn connected(&self) -> Vec<GatewayInfo> {
        let mut gateways: Vec<GatewayInfo> = self
            .status
            .iter()
            .filter(|(_, status)| status.connected)
            .map(|(device_id, status)| GatewayInfo {
                device_id: device_id.clone(),
                status: status.clone(),
            })
            .collect();
        gateways.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        gateways
    }

    pub fn status(&self, device_id: &str) -> GatewayStatus {
        self.status.get(device_id).cloned().unwrap_or_default()
    }

    /// Signals every open socket to close and empties the live map. Returns
    /// the device ids that were registered.
    pub fn close_all(&mut self) -> Vec<String> {
        for close in self.sockets.values() {
            close.notify_one();
        }
        let devices: Vec<String> = self.live.drain().map(|(device_id, _)| device_id).collect();
        for device_id in &devices {
            self.mark_disconnected(device_id);
        }
        devices
    }

    fn mark_disconnected(&mut self, device_id: &str) {
        if let Some(status) = self.status.get_mut(device_id) {
            status.connected = false;
            status.last_disconnect = Some(Utc::now());
        }
    }
}
