//! Gateway events published to the application layer.

use crate::mbus::frame::MBusFrame;
use serde::Serialize;
use tokio::sync::broadcast;

/// Something observable that happened on the gateway server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GatewayEvent {
    /// A gateway identified itself and was registered.
    GatewayConnected { device_id: String, ip: String },
    /// A registered gateway's socket went away.
    GatewayDisconnected { device_id: String },
    /// A complete frame arrived from a registered gateway, solicited or not.
    DataReceived {
        device_id: String,
        response: MBusFrame,
    },
    /// The server failed in a way that is not tied to one gateway.
    ServerError { message: String },
}

/// Fan-out of [`GatewayEvent`]s to any number of subscribers.
///
/// Subscribers that fall behind lose the oldest events instead of stalling
/// the connections that produce them.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: GatewayEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("No event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_kebab_tag() {
        let event = GatewayEvent::GatewayDisconnected {
            device_id: "oriongsm-1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "gateway-disconnected");
        assert_eq!(json["device_id"], "oriongsm-1");
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(GatewayEvent::ServerError {
            message: "nobody listening".into(),
        });

        let mut rx = bus.subscribe();
        bus.emit(GatewayEvent::GatewayConnected {
            device_id: "integral-2".into(),
            ip: "10.0.0.2".into(),
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            GatewayEvent::GatewayConnected { .. }
        ));
    }
}
