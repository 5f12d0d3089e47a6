//! # M-Bus Gateway Server
//!
//! `GatewayServer` is the entry point of the crate: it accepts persistent TCP
//! connections from metering gateways (Orion GSM, Wimbus, Integral), keeps
//! track of which gateway is on which socket, sends read commands and hands
//! back the responses.
//!
//! The server is a cheap handle; clone it into whatever needs it (an HTTP
//! layer, a polling task). Construct it once, subscribe to events, call
//! [`GatewayServer::start`], and call [`GatewayServer::stop`] on shutdown.
//!
//! ```rust,no_run
//! use mbus_gateway::{GatewayConfig, GatewayServer};
//!
//! # async fn run() -> Result<(), mbus_gateway::MBusError> {
//! let server = GatewayServer::new(GatewayConfig::default());
//! let mut events = server.subscribe();
//! server.start().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::GatewayConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::MBusError;
use crate::gateway::connection::serve_connection;
use crate::gateway::correlator::{Correlator, Delivery, SlotId};
use crate::gateway::events::{EventBus, GatewayEvent};
use crate::gateway::registry::{GatewayInfo, GatewayStatus, LiveConnection, Registry, SharedWriter};
use crate::mbus::frame::{build_read_command, MBusFrame};
use crate::payload::register::{decode_frame_registers, RegisterValue};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;

/// Shared state behind every [`GatewayServer`] handle.
pub(crate) struct ServerInner {
    config: GatewayConfig,
    registry: Mutex<Registry>,
    correlator: Correlator,
    events: EventBus,
    next_conn_id: AtomicU64,
    listener: Mutex<Option<(SocketAddr, JoinHandle<()>)>>,
}

impl ServerInner {
    pub(crate) fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub(crate) async fn register(
        &self,
        device_id: &str,
        conn_id: u64,
        peer: SocketAddr,
        writer: SharedWriter,
        close: Arc<Notify>,
    ) {
        let replaced = self.registry.lock().await.register(
            device_id,
            LiveConnection {
                conn_id,
                peer,
                writer,
                close,
            },
        );

        if let Some(old) = replaced {
            info!(
                "Gateway {device_id} reconnected from {peer}, closing previous socket {}",
                old.peer
            );
            old.close.notify_one();
        }

        info!("Gateway {device_id} connected from {peer}");
        self.events.emit(GatewayEvent::GatewayConnected {
            device_id: device_id.to_string(),
            ip: peer.ip().to_string(),
        });
    }

    /// Routes a frame read on socket `conn_id`. Frames from a socket that has
    /// since been replaced are dropped.
    pub(crate) async fn frame_received(&self, device_id: &str, conn_id: u64, frame: MBusFrame) {
        if !self.registry.lock().await.touch(device_id, conn_id) {
            debug!(
                "Gateway {device_id}: dropping {:?} frame from replaced socket {conn_id}",
                frame.frame_type
            );
            return;
        }

        match self.correlator.dispatch(device_id, &frame).await {
            Delivery::Unsolicited => {
                debug!("Gateway {device_id}: unsolicited {:?} frame", frame.frame_type)
            }
            delivery => debug!(
                "Gateway {device_id}: {:?} frame delivered to {delivery:?}",
                frame.frame_type
            ),
        }

        self.events.emit(GatewayEvent::DataReceived {
            device_id: device_id.to_string(),
            response: frame,
        });
    }

    pub(crate) async fn connection_closed(&self, conn_id: u64, device_id: Option<&str>) {
        let unregistered = {
            let mut registry = self.registry.lock().await;
            registry.untrack(conn_id);
            device_id.filter(|id| registry.unregister(id, conn_id))
        };

        if let Some(device_id) = unregistered {
            self.correlator.forget(device_id).await;
            info!("Gateway {device_id} disconnected");
            self.events.emit(GatewayEvent::GatewayDisconnected {
                device_id: device_id.to_string(),
            });
        }
    }
}

/// Handle to the gateway server.
#[derive(Clone)]
pub struct GatewayServer {
    inner: Arc<ServerInner>,
}

impl GatewayServer {
    /// Creates a server; nothing is bound until [`GatewayServer::start`].
    pub fn new(config: GatewayConfig) -> Self {
        GatewayServer {
            inner: Arc::new(ServerInner {
                config,
                registry: Mutex::new(Registry::default()),
                correlator: Correlator::new(),
                events: EventBus::new(EVENT_CHANNEL_CAPACITY),
                next_conn_id: AtomicU64::new(1),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Receives every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }

    /// Binds the listener and starts accepting gateways in the background.
    ///
    /// A bind failure is returned and also published as a
    /// [`GatewayEvent::ServerError`].
    pub async fn start(&self) -> Result<SocketAddr, MBusError> {
        let mut listener_slot = self.inner.listener.lock().await;
        if let Some((addr, _)) = listener_slot.as_ref() {
            return Err(MBusError::Other(format!("already listening on {addr}")));
        }

        let addr = self.inner.config.listen_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                let err = MBusError::Bind { addr, source };
                error!("{err}");
                self.inner.events.emit(GatewayEvent::ServerError {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };
        let local_addr = listener.local_addr()?;
        info!("M-Bus gateway server listening on {local_addr}");

        let server = self.clone();
        let task = tokio::spawn(async move { server.accept_loop(listener).await });
        *listener_slot = Some((local_addr, task));
        Ok(local_addr)
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Accepted connection from {peer}");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("{peer}: set_nodelay failed: {e}");
                    }
                    let _connection = self.attach(stream, peer).await;
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    // persistent errors such as fd exhaustion would spin
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Address the listener is bound to, once started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.listener.lock().await.as_ref().map(|(addr, _)| *addr)
    }

    /// Runs the gateway protocol on an already established stream.
    ///
    /// The accept loop uses this for TCP sockets; anything else that speaks
    /// the same byte stream (tunnels, in-memory pipes) can be attached too.
    pub async fn attach<S>(&self, stream: S, peer: SocketAddr) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let close = Arc::new(Notify::new());
        self.inner.registry.lock().await.track(conn_id, close.clone());
        tokio::spawn(serve_connection(
            self.inner.clone(),
            stream,
            peer,
            conn_id,
            close,
        ))
    }

    /// Stops listening and closes every gateway socket. Status history is
    /// kept.
    pub async fn stop(&self) {
        if let Some((addr, task)) = self.inner.listener.lock().await.take() {
            task.abort();
            info!("Stopped listening on {addr}");
        }

        let devices = self.inner.registry.lock().await.close_all();
        self.inner.correlator.forget_all().await;
        for device_id in devices {
            info!("Gateway {device_id} disconnected (server stopping)");
            self.inner
                .events
                .emit(GatewayEvent::GatewayDisconnected { device_id });
        }
    }

    /// Status of every gateway currently connected.
    pub async fn get_connected_gateways(&self) -> Vec<GatewayInfo> {
        self.inner.registry.lock().await.connected()
    }

    /// Status of `device_id`; a never seen device reports disconnected.
    pub async fn get_gateway_status(&self, device_id: &str) -> GatewayStatus {
        self.inner.registry.lock().await.status(device_id)
    }

    /// Number of open sockets, including gateways that have not identified
    /// themselves yet.
    pub async fn open_sockets(&self) -> usize {
        self.inner.registry.lock().await.open_sockets()
    }

    /// Sends `command` to `device_id` and waits for the next frame it sends
    /// back.
    ///
    /// Only one command may be outstanding per device; a second call while
    /// one is pending, or while [`GatewayServer::read_meter`] is still waiting
    /// for the meter's data, fails with [`MBusError::CommandInProgress`].
    pub async fn send_command(
        &self,
        device_id: &str,
        command: &[u8],
        timeout: Duration,
    ) -> Result<MBusFrame, MBusError> {
        self.exchange(device_id, command, timeout, None).await
    }

    async fn exchange(
        &self,
        device_id: &str,
        command: &[u8],
        timeout: Duration,
        read: Option<SlotId>,
    ) -> Result<MBusFrame, MBusError> {
        let writer = self
            .inner
            .registry
            .lock()
            .await
            .writer(device_id)
            .ok_or_else(|| MBusError::DeviceNotConnected(device_id.to_string()))?;

        let correlator = &self.inner.correlator;
        let (slot, response) = match read {
            Some(read) => correlator.begin_read_command(device_id, read).await?,
            None => correlator.begin_command(device_id).await?,
        };

        if let Err(e) = write_command(&writer, command).await {
            correlator.cancel_command(device_id, slot).await;
            warn!("Gateway {device_id}: command write failed: {e}");
            return Err(e.into());
        }
        debug!("Gateway {device_id}: sent {} byte command", command.len());

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(frame)) => Ok(frame),
            // slot dropped by a disconnect or stop
            Ok(Err(_)) => Err(MBusError::DeviceNotConnected(device_id.to_string())),
            Err(_) => {
                correlator.cancel_command(device_id, slot).await;
                Err(MBusError::CommandTimeout {
                    device_id: device_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Reads the current registers of the meter at `primary_address` behind
    /// `device_id`.
    ///
    /// Returns `None` when the meter could not be read this cycle; failures
    /// are logged, never returned.
    pub async fn read_meter(
        &self,
        device_id: &str,
        primary_address: u8,
    ) -> Option<Vec<RegisterValue>> {
        match self.try_read_meter(device_id, primary_address).await {
            Ok(registers) => registers,
            Err(e) => {
                warn!("Reading meter {primary_address} via {device_id} failed: {e}");
                None
            }
        }
    }

    async fn try_read_meter(
        &self,
        device_id: &str,
        primary_address: u8,
    ) -> Result<Option<Vec<RegisterValue>>, MBusError> {
        let command = build_read_command(primary_address);
        let correlator = &self.inner.correlator;

        // Registered before the command goes out so a data telegram that
        // follows the ACK immediately cannot be missed. The waiter also keeps
        // other commands off the device until the read is over.
        let (wait_slot, data) = correlator.begin_data_wait(device_id).await?;

        let response = match self
            .exchange(
                device_id,
                &command,
                self.inner.config.command_timeout(),
                Some(wait_slot),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                correlator.cancel_data_wait(device_id, wait_slot).await;
                return Err(e);
            }
        };

        if !response.is_ack() {
            correlator.cancel_data_wait(device_id, wait_slot).await;
            return Ok(decode_frame_registers(&response));
        }

        debug!("Gateway {device_id}: meter {primary_address} acknowledged, waiting for data");
        let registers = match tokio::time::timeout(self.inner.config.data_timeout(), data).await {
            Ok(Ok(frame)) => decode_frame_registers(&frame),
            Ok(Err(_)) => None,
            Err(_) => {
                info!("Gateway {device_id}: no data from meter {primary_address} after ACK");
                None
            }
        };
        correlator.cancel_data_wait(device_id, wait_slot).await;
        Ok(registers)
    }
}

async fn write_command(writer: &SharedWriter, command: &[u8]) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(command).await?;
    writer.flush().await
}
