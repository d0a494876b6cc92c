//! One accepted subscriber socket.
//!
//! The socket is split: the receive loop in [`super::server`] owns the read
//! half, a writer task owns the write half and drains a bounded frame queue.
//! `send` only enqueues, so callers never wait on a slow client.

use crate::domain::ConnectionId;
use crate::error::TransportError;
use crate::wire::encode_frame;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

/// Shared handle to one client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    /// False once a disconnect or transport error has been observed
    enabled: AtomicBool,
    outbound: mpsc::Sender<Bytes>,
    queue_capacity: usize,
    closed_tx: watch::Sender<bool>,
}

impl Connection {
    /// Create a connection handle and the receiving end of its frame queue.
    pub(crate) fn new(
        id: ConnectionId,
        peer: SocketAddr,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let queue_capacity = queue_capacity.max(1);
        let (outbound, outbound_rx) = mpsc::channel(queue_capacity);
        let (closed_tx, _) = watch::channel(false);

        let connection = Arc::new(Self {
            id,
            peer,
            enabled: AtomicBool::new(true),
            outbound,
            queue_capacity,
            closed_tx,
        });
        (connection, outbound_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, for diagnostics only
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Frame `payload` and queue it for delivery.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = encode_frame(payload)?;
        self.send_frame(frame)
    }

    /// Queue an already framed message. Lets one frame be shared by many
    /// connections without re-encoding.
    ///
    /// Fails with `ConnectionClosed` once the connection is disabled. A full
    /// queue closes the connection.
    pub fn send_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_enabled() {
            return Err(TransportError::ConnectionClosed);
        }

        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    connection_id = %self.id,
                    peer = %self.peer,
                    capacity = self.queue_capacity,
                    "Send queue full, dropping slow subscriber"
                );
                self.close();
                Err(TransportError::SendQueueFull {
                    capacity: self.queue_capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    /// Disable the connection and wake its tasks. Idempotent.
    pub fn close(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            debug!(connection_id = %self.id, "Connection disabled");
            self.closed_tx.send_replace(true);
        }
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        super::wait_until_set(&mut rx).await;
    }
}

/// Drain the frame queue into the socket until the connection closes or a
/// write fails.
///
/// A write blocked on a peer that stopped reading is abandoned as soon as the
/// connection closes, so the session can finish and release the socket.
pub(crate) async fn write_loop(
    connection: Arc<Connection>,
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Bytes>,
) {
    loop {
        let frame = tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = connection.closed() => break,
        };

        let written = tokio::select! {
            written = writer.write_all(&frame) => written,
            _ = connection.closed() => {
                debug!(
                    connection_id = %connection.id(),
                    bytes = frame.len(),
                    "Connection closed during write, frame abandoned"
                );
                break;
            }
        };
        if let Err(e) = written {
            debug!(
                connection_id = %connection.id(),
                error = %e,
                "Write failed"
            );
            connection.close();
            break;
        }
        trace!(connection_id = %connection.id(), bytes = frame.len(), "Frame written");
    }
    let _ = writer.shutdown().await;
}
