//! Connection
//!
//! Owns one TCP connection to a device: performs the handshake, serializes
//! outbound frames, and owns the receive thread that dispatches responses.
//!
//! ## Concurrency Model
//!
//! - **Writes**: any number of threads may `submit`; frame bytes are written
//!   under a single writer lock so frames never interleave on the wire
//! - **Reads**: exactly one receive thread per connection (see `dispatch`)
//! - **Handlers**: run on the receive thread, or on whichever thread tears
//!   the connection down; never while the writer or table lock is held

use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::auth::Authenticator;
use crate::config::SessionConfig;
use crate::error::{KineticError, Result};
use crate::protocol::{
    read_frame, AuthInfo, Command, CommandHeader, Frame, Message, MessageCodec, MessageType,
};

use super::dispatch;
use super::{CompletionHandler, OperationTable, PendingOperation, Request, SequenceNumber};

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting submissions
    Connected,

    /// A fatal transport or authentication error was observed
    Broken,

    /// `disconnect` was called
    Disconnected,
}

/// Values the device assigned during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub connection_id: i64,
    pub cluster_version: i64,
}

/// State shared between the connection handle and its receive thread
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) handshake: HandshakeInfo,
    pub(crate) peer_addr: String,
    pub(crate) operations: OperationTable,
    pub(crate) authenticator: Authenticator,
    pub(crate) codec: Arc<dyn MessageCodec>,

    /// Next sequence number to hand out
    next_sequence: AtomicU64,

    /// Serializes outbound frames
    writer: Mutex<BufWriter<TcpStream>>,

    /// Handle used only to shut the socket down
    socket: TcpStream,

    state: Mutex<ConnectionState>,
}

impl Shared {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Mark the connection broken, close the socket, and cancel everything
    /// still pending. Safe to call from any thread, any number of times.
    pub(crate) fn abort(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Broken;
            }
        }
        self.shutdown_socket();
        self.cancel_all(reason);
    }

    fn shutdown_socket(&self) {
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            // Already closed by the peer or an earlier shutdown
            tracing::trace!("Socket shutdown for {}: {}", self.peer_addr, e);
        }
    }

    fn cancel_all(&self, reason: &str) {
        let drained = self.operations.drain_all();
        if drained.is_empty() {
            return;
        }

        tracing::debug!(
            "Cancelling {} pending operations on connection {}: {}",
            drained.len(),
            self.handshake.connection_id,
            reason
        );
        for operation in drained {
            operation.cancel(reason);
        }
    }
}

/// A single authenticated connection to a device
pub struct Connection {
    shared: Arc<Shared>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect, complete the handshake, and start the receive thread
    pub fn connect(config: SessionConfig, codec: Arc<dyn MessageCodec>) -> Result<Self> {
        config.validate()?;
        let address = config.address();

        let stream = open_stream(&config)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(config.handshake_timeout()))?;

        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| address.clone());

        let mut reader = BufReader::new(stream.try_clone()?);
        let handshake = read_handshake(&mut reader, &config, codec.as_ref(), &peer_addr)?;

        // The receive loop blocks indefinitely; teardown unblocks it
        stream.set_read_timeout(None)?;
        if config.write_timeout_ms > 0 {
            stream.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms)))?;
        }

        tracing::info!(
            "Connected to {} (connection id {}, cluster version {})",
            peer_addr,
            handshake.connection_id,
            handshake.cluster_version
        );

        let shared = Arc::new(Shared {
            authenticator: Authenticator::new(config.identity, config.hmac_key.clone()),
            operations: OperationTable::new(config.max_outstanding),
            // 0 is the ack of device-initiated frames; requests never use it
            next_sequence: AtomicU64::new(1),
            writer: Mutex::new(BufWriter::new(stream.try_clone()?)),
            socket: stream,
            state: Mutex::new(ConnectionState::Connected),
            config,
            handshake,
            peer_addr,
            codec,
        });

        let loop_shared = Arc::clone(&shared);
        let receiver = thread::Builder::new()
            .name(format!("kinetic-recv-{}", handshake.connection_id))
            .spawn(move || dispatch::run(loop_shared, reader))?;

        Ok(Self {
            shared,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Submit a request without waiting for its response
    ///
    /// On `Ok`, `handler` will be invoked exactly once. On `Err`, it is
    /// dropped without being invoked.
    pub fn submit(&self, request: Request, handler: CompletionHandler) -> Result<SequenceNumber> {
        let shared = &self.shared;
        if shared.state() != ConnectionState::Connected {
            return Err(KineticError::NotConnected);
        }

        let sequence = shared.next_sequence.fetch_add(1, Ordering::SeqCst);
        let command = Command {
            header: CommandHeader {
                cluster_version: shared.config.cluster_version,
                connection_id: shared.handshake.connection_id,
                sequence,
                ack_sequence: 0,
                message_type: MessageType::Request(request.kind),
                timeout_ms: 0,
            },
            key_value: request.key_value,
            range: request.range,
            keys: Vec::new(),
            status: None,
        };

        // Everything that can fail locally happens before registration
        let command_bytes = shared.codec.encode_command(&command)?;
        let message = Message {
            auth: shared.authenticator.auth_info(&command_bytes)?,
            command: command_bytes,
        };
        let frame = Frame::new(shared.codec.encode_message(&message)?, request.value);
        let bytes = frame.encode(&shared.config.frame)?;

        let registered = shared.operations.insert(PendingOperation::new(
            sequence,
            request.kind,
            request.capture,
            handler,
        ));
        if let Err(e) = registered {
            if e.is_fatal() {
                tracing::error!("Sequence {} on {}: {}", sequence, shared.peer_addr, e);
                shared.abort(&e.to_string());
            }
            return Err(e);
        }

        let written = {
            let mut writer = shared.writer.lock();
            writer.write_all(&bytes).and_then(|_| writer.flush())
        };

        if let Err(e) = written {
            tracing::error!(
                "Write of sequence {} to {} failed: {}",
                sequence,
                shared.peer_addr,
                e
            );
            let withdrawn = shared.operations.remove(sequence).ok();
            shared.abort(&format!("write failed: {}", e));

            // If teardown got to the operation first, its handler has run
            return match withdrawn {
                Some(_) => Err(e.into()),
                None => Ok(sequence),
            };
        }

        tracing::trace!(
            "Submitted {:?} sequence {} ({} bytes)",
            request.kind,
            sequence,
            bytes.len()
        );
        Ok(sequence)
    }

    /// Stop the receive loop, cancel all pending operations, close the socket
    ///
    /// Idempotent. May be called from inside a completion handler.
    pub fn disconnect(&self) {
        let previous = {
            let mut state = self.shared.state.lock();
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        if previous == ConnectionState::Disconnected {
            return;
        }

        tracing::debug!(
            "Disconnecting from {} (connection id {})",
            self.shared.peer_addr,
            self.shared.handshake.connection_id
        );

        self.shared.shutdown_socket();

        if let Some(handle) = self.receiver.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("Receive thread for {} panicked", self.shared.peer_addr);
            }
        }

        self.shared.cancel_all("connection disconnected");
        tracing::info!("Disconnected from {}", self.shared.peer_addr);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connection id assigned by the device
    pub fn connection_id(&self) -> i64 {
        self.shared.handshake.connection_id
    }

    /// Cluster version reported by the device
    pub fn cluster_version(&self) -> i64 {
        self.shared.handshake.cluster_version
    }

    /// Number of operations awaiting a response
    pub fn outstanding(&self) -> usize {
        self.shared.operations.len()
    }

    pub fn peer_addr(&self) -> &str {
        &self.shared.peer_addr
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn open_stream(config: &SessionConfig) -> Result<TcpStream> {
    let address = config.address();
    let addrs: Vec<SocketAddr> = address.to_socket_addrs()?.collect();

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) if e.kind() == ErrorKind::ConnectionRefused => {
            KineticError::ConnectionRefused(address)
        }
        Some(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
            KineticError::ConnectionRefused(format!("{} (timed out)", address))
        }
        Some(e) => KineticError::Io(e),
        None => KineticError::Config(format!("{} did not resolve to any address", address)),
    })
}

/// Read and check the device's unsolicited handshake status
fn read_handshake(
    reader: &mut BufReader<TcpStream>,
    config: &SessionConfig,
    codec: &dyn MessageCodec,
    peer_addr: &str,
) -> Result<HandshakeInfo> {
    let frame = match read_frame(reader, &config.frame) {
        Ok(frame) => frame,
        Err(KineticError::Io(ref e))
            if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
            return Err(KineticError::HandshakeTimeout(peer_addr.to_string()));
        }
        Err(KineticError::ConnectionClosed) => {
            return Err(KineticError::Handshake(
                "device closed the connection before the handshake".to_string(),
            ));
        }
        Err(e) => return Err(e),
    };

    let message = codec.decode_message(&frame.message)?;
    if message.auth != AuthInfo::Unsolicited {
        return Err(KineticError::Handshake(
            "handshake must be an unsolicited status".to_string(),
        ));
    }

    let command = codec.decode_command(&message.command)?;
    if command.header.message_type != MessageType::Unsolicited {
        return Err(KineticError::Handshake(format!(
            "unexpected handshake message type {:?}",
            command.header.message_type
        )));
    }
    if let Some(status) = &command.status {
        if !status.code.is_success() {
            return Err(KineticError::Handshake(format!(
                "device refused session: {}{}",
                status.code,
                status
                    .message
                    .as_deref()
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default()
            )));
        }
    }

    let info = HandshakeInfo {
        connection_id: command.header.connection_id,
        cluster_version: command.header.cluster_version,
    };
    if info.cluster_version != config.cluster_version {
        return Err(KineticError::ClusterVersionMismatch {
            expected: config.cluster_version,
            actual: info.cluster_version,
        });
    }

    tracing::debug!(
        "Handshake from {}: connection id {}, cluster version {}",
        peer_addr,
        info.connection_id,
        info.cluster_version
    );
    Ok(info)
}
