//! # Gateway Connection
//!
//! One task per accepted socket. Inbound bytes accumulate in a receive
//! buffer; the gateway's identifier is pulled out of the first bytes once
//! enough have arrived, and complete M-Bus frames are cut off the front of
//! the buffer as they become available.
//!
//! The byte handling lives in [`ConnectionState`], which does no I/O, so the
//! framing rules can be exercised without sockets.
//!
//! An identifier that runs up to the last buffered byte may still be growing
//! (a 15 digit prefix of a 20 digit Wimbus address looks like an IMEI). Such
//! a match is only taken once a byte of another class follows, the handshake
//! window is full, or the gateway stays quiet for [`HANDSHAKE_SETTLE_MS`].

use crate::constants::{HANDSHAKE_SETTLE_MS, HANDSHAKE_WINDOW, MIN_HANDSHAKE_LEN};
use crate::gateway::identifier::locate_device_id;
use crate::gateway::registry::SharedWriter;
use crate::gateway::server::ServerInner;
use crate::mbus::frame::{parse_frame, resync_offset, verify_frame, MBusFrame};
use crate::util::logging::{log_frame_hex, LogThrottle};
use bytes::{Buf, BytesMut};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};

const READ_CHUNK: usize = 1024;

/// Result of feeding bytes to a [`ConnectionState`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Ingest {
    /// Set on the call that resolved the device identifier.
    pub identified: Option<String>,
    /// Complete frames, in wire order.
    pub frames: Vec<MBusFrame>,
    /// Bytes thrown away while resynchronizing or on overflow.
    pub discarded: usize,
    /// Frames dropped for a bad checksum.
    pub corrupt: usize,
}

/// Receive side protocol state of one gateway socket.
#[derive(Debug)]
pub struct ConnectionState {
    peer: SocketAddr,
    device_id: Option<String>,
    buffer: BytesMut,
    max_buffer_len: usize,
    verify_checksum: bool,
    noise_log: LogThrottle,
}

impl ConnectionState {
    pub fn new(peer: SocketAddr, max_buffer_len: usize, verify_checksum: bool) -> Self {
        ConnectionState {
            peer,
            device_id: None,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            max_buffer_len,
            verify_checksum,
            noise_log: LogThrottle::new(10_000, 5),
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// True while an identifier candidate ends at the last buffered byte and
    /// more of it may still arrive.
    pub fn handshake_unsettled(&self) -> bool {
        self.device_id.is_none()
            && self.buffer.len() >= MIN_HANDSHAKE_LEN
            && locate_device_id(&self.buffer).is_some()
    }

    /// Appends `bytes` to the receive buffer and extracts whatever is now
    /// complete.
    pub fn ingest(&mut self, bytes: &[u8]) -> Ingest {
        self.buffer.extend_from_slice(bytes);
        self.process(false)
    }

    /// Accepts an identifier that ends at the last buffered byte. Called once
    /// the gateway has gone quiet after its handshake.
    pub fn settle(&mut self) -> Ingest {
        self.process(true)
    }

    fn process(&mut self, settled: bool) -> Ingest {
        let mut out = Ingest::default();

        if self.device_id.is_none() && self.buffer.len() >= MIN_HANDSHAKE_LEN {
            let range = locate_device_id(&self.buffer).filter(|range| {
                settled || range.end < self.buffer.len() || self.buffer.len() >= HANDSHAKE_WINDOW
            });
            if let Some(range) = range {
                let device_id = String::from_utf8_lossy(&self.buffer[range.clone()]).into_owned();
                // the handshake is not part of any frame
                self.buffer.advance(range.end);
                self.device_id = Some(device_id.clone());
                out.identified = Some(device_id);
            }
        }

        loop {
            match parse_frame(&self.buffer) {
                Ok(None) => break,
                Ok(Some((frame, consumed))) => {
                    self.buffer.advance(consumed);
                    if self.verify_checksum {
                        if let Err(e) = verify_frame(&frame) {
                            warn!("{}: dropping corrupt frame: {e}", self.label());
                            out.corrupt += 1;
                            continue;
                        }
                    }
                    out.frames.push(frame);
                }
                Err(e) => {
                    // Until the gateway has identified itself the bytes may be
                    // the rest of its handshake
                    if self.device_id.is_none() {
                        break;
                    }
                    let skip = resync_offset(&self.buffer);
                    if self.noise_log.allow() {
                        warn!(
                            "{}: {e}, discarding {skip} bytes ({} similar messages suppressed)",
                            self.label(),
                            self.noise_log.take_suppressed()
                        );
                    }
                    self.buffer.advance(skip);
                    out.discarded += skip;
                }
            }
        }

        if self.buffer.len() > self.max_buffer_len {
            warn!(
                "{}: receive buffer exceeded {} bytes, clearing",
                self.label(),
                self.max_buffer_len
            );
            out.discarded += self.buffer.len();
            self.buffer.clear();
        }

        out
    }

    fn label(&self) -> String {
        match &self.device_id {
            Some(device_id) => format!("{device_id} ({})", self.peer),
            None => self.peer.to_string(),
        }
    }
}

/// Why a connection task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    PeerClosed,
    IdleTimeout,
    SocketError,
    Requested,
}

/// Runs the protocol on one gateway socket until it closes.
pub(crate) async fn serve_connection<S>(
    inner: Arc<ServerInner>,
    stream: S,
    peer: SocketAddr,
    conn_id: u64,
    close: Arc<Notify>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let config = inner.config();
    let mut state = ConnectionState::new(peer, config.max_buffer_len, config.verify_checksum);
    let idle_timeout = config.idle_timeout();
    let settle_timeout = Duration::from_millis(HANDSHAKE_SETTLE_MS).min(idle_timeout);
    let mut chunk = [0u8; READ_CHUNK];

    let reason = loop {
        let settling = state.handshake_unsettled();
        let wait = if settling { settle_timeout } else { idle_timeout };
        let read = tokio::select! {
            _ = close.notified() => break CloseReason::Requested,
            read = tokio::time::timeout(wait, reader.read(&mut chunk)) => read,
        };

        let ingest = match read {
            Err(_) if settling => state.settle(),
            Err(_) => break CloseReason::IdleTimeout,
            Ok(Ok(0)) => break CloseReason::PeerClosed,
            Ok(Ok(n)) => {
                log_frame_hex(&format!("{peer} rx"), &chunk[..n]);
                state.ingest(&chunk[..n])
            }
            Ok(Err(e)) => {
                warn!("{peer}: socket error: {e}");
                break CloseReason::SocketError;
            }
        };

        if let Some(device_id) = ingest.identified {
            inner
                .register(&device_id, conn_id, peer, writer.clone(), close.clone())
                .await;
        }

        match state.device_id() {
            Some(device_id) => {
                for frame in ingest.frames {
                    inner.frame_received(device_id, conn_id, frame).await;
                }
            }
            None => {
                for frame in ingest.frames {
                    debug!(
                        "{peer}: dropping {:?} frame received before identification",
                        frame.frame_type
                    );
                }
            }
        }
    };

    match reason {
        CloseReason::IdleTimeout => info!("{peer}: idle timeout, closing"),
        reason => debug!("{peer}: connection ended ({reason:?})"),
    }

    if let Err(e) = writer.lock().await.shutdown().await {
        debug!("{peer}: shutdown failed: {e}");
    }
    inner.connection_closed(conn_id, state.device_id()).await;
}
