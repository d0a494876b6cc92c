//! TCP accept loop and per-connection receive loop.
//!
//! Each accepted socket gets its own task. The receive loop issues bounded
//! reads, feeds the [`CommandDecoder`], and reports every decoded command to
//! the [`ConnectionHandler`] in arrival order, followed by exactly one
//! disconnect once the stream ends.

use super::connection::{write_loop, Connection};
use super::wait_until_set;
use crate::domain::{ConnectionId, ProtocolMode, SubscriptionConfig};
use crate::error::{ProtocolError, TransportError};
use crate::metrics;
use crate::wire::{CommandDecoder, RawCommand};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Listen backlog
const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Consecutive non-disconnect read errors tolerated before giving up
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 3;

/// Receives transport events. Called from the connection's own receive task,
/// so calls for one connection never overlap and arrive in order.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A socket was accepted
    fn on_connect(&self, _connection: &Arc<Connection>) {}

    /// One complete command was decoded
    fn on_command(&self, connection: &Arc<Connection>, command: RawCommand);

    /// A framing problem; the offending bytes were dropped
    fn on_protocol_error(&self, connection: &Arc<Connection>, error: ProtocolError) {
        debug!(
            connection_id = %connection.id(),
            error = %error,
            "Dropped malformed input"
        );
    }

    /// Raised exactly once per connection. The connection is already
    /// disabled when this is called.
    fn on_disconnect(&self, connection: &Arc<Connection>);
}

/// Per-session settings taken from [`SubscriptionConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub protocol: ProtocolMode,
    pub read_buffer_size: usize,
    pub send_queue_capacity: usize,
    pub max_line_length: usize,
}

impl From<&SubscriptionConfig> for SessionSettings {
    fn from(config: &SubscriptionConfig) -> Self {
        Self {
            protocol: config.protocol,
            read_buffer_size: config.read_buffer_size,
            send_queue_capacity: config.send_queue_capacity,
            max_line_length: config.max_line_length,
        }
    }
}

/// Bound listening socket.
pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    settings: SessionSettings,
}

impl TcpServer {
    /// Bind with `SO_REUSEADDR` and start listening.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: SocketAddr, settings: SessionSettings) -> Result<Self, TransportError> {
        let bind_err = |source| TransportError::Bind { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(addr = %local_addr, protocol = ?settings.protocol, "Block subscription server listening");

        Ok(Self {
            listener,
            local_addr,
            settings,
        })
    }

    /// Actual bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until `shutdown` flips to true. Never waits on a session.
    pub async fn run(self, handler: Arc<dyn ConnectionHandler>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        let shutdown = shutdown.clone();
                        let settings = self.settings;
                        tokio::spawn(async move {
                            run_session(stream, peer, settings, handler, shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %TransportError::Accept(e), "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                _ = wait_until_set(&mut shutdown) => break,
            }
        }
        info!(addr = %self.local_addr, "Block subscription server stopped accepting");
    }
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    settings: SessionSettings,
    handler: Arc<dyn ConnectionHandler>,
    shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let (connection, outbound_rx) =
        Connection::new(ConnectionId::new(), peer, settings.send_queue_capacity);
    let (reader, writer) = stream.into_split();

    info!(connection_id = %connection.id(), peer = %peer, "Subscriber connected");
    metrics::record_connection_opened();
    handler.on_connect(&connection);

    let writer_task = tokio::spawn(write_loop(Arc::clone(&connection), writer, outbound_rx));

    receive_loop(&connection, reader, settings, handler.as_ref(), shutdown).await;

    // Disable before notifying so no send can slip in after the disconnect.
    connection.close();
    handler.on_disconnect(&connection);
    metrics::record_connection_closed();

    if let Err(e) = writer_task.await {
        debug!(connection_id = %connection.id(), error = %e, "Writer task ended abnormally");
    }
    info!(connection_id = %connection.id(), peer = %peer, "Subscriber disconnected");
}

async fn receive_loop(
    connection: &Arc<Connection>,
    mut reader: OwnedReadHalf,
    settings: SessionSettings,
    handler: &dyn ConnectionHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut decoder = CommandDecoder::new(settings.protocol, settings.max_line_length);
    let mut buf = vec![0u8; settings.read_buffer_size.max(1)];
    let mut read_errors = 0u32;

    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            _ = connection.closed() => {
                debug!(connection_id = %connection.id(), "Connection closed locally");
                return;
            }
            _ = wait_until_set(&mut shutdown) => return,
        };

        match read {
            Ok(0) => {
                debug!(connection_id = %connection.id(), "End of stream");
                return;
            }
            Ok(n) => {
                read_errors = 0;
                decoder.extend(&buf[..n]);
                while let Some(decoded) = decoder.next_command() {
                    match decoded {
                        Ok(command) => handler.on_command(connection, command),
                        Err(error) => handler.on_protocol_error(connection, error),
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_disconnect(e.kind()) => {
                debug!(connection_id = %connection.id(), error = %e, "Peer disconnected");
                return;
            }
            Err(e) => {
                read_errors += 1;
                if read_errors > MAX_CONSECUTIVE_READ_ERRORS {
                    warn!(connection_id = %connection.id(), error = %e, "Read keeps failing, dropping connection");
                    return;
                }
                debug!(connection_id = %connection.id(), error = %e, "Read failed, retrying");
            }
        }
    }
}

/// Read errors that mean the peer is gone. Anything else reissues the read.
fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}
