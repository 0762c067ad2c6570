//! Remote Sensor Connection
//!
//! TCP client for the Scratch remote sensor port. Owns the socket, runs the
//! receive loop as a background task and serializes outgoing frames.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::connection::codec;
use crate::connection::protocol::{Command, SensorValue};
use crate::connection::receiver::{LoopExit, Receiver};
use crate::connection::state::{ConnectionState, ConnectionStateManager, StateTransition};
use crate::error::{Error, Result};
use crate::handler::SensorHandler;

/// State shared between the connection and its receive loop
pub(crate) struct Shared {
    pub(crate) state: ConnectionStateManager,
    /// Write half of the socket; the lock keeps frames from interleaving
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl Shared {
    /// Release the socket after the receive loop hit an unrecoverable error
    pub(crate) async fn close_after_failure(&self, reason: &str) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Socket shutdown failed");
            }
        }
        self.state.set_disconnected(Some(reason.to_string()));
    }
}

/// Handle on a running receive loop
struct ReceiverHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<LoopExit>,
    session_id: Uuid,
    peer: SocketAddr,
}

/// Client connection to Scratch's remote sensor port
pub struct RemoteSensorConnection {
    config: ConnectionConfig,
    handler: Arc<dyn SensorHandler>,
    shared: Arc<Shared>,
    receiver: Mutex<Option<ReceiverHandle>>,
}

impl RemoteSensorConnection {
    /// Create a connection with default settings (`127.0.0.1:42001`)
    pub fn new(handler: impl SensorHandler + 'static) -> Self {
        Self::with_config(ConnectionConfig::default(), handler)
    }

    /// Create a connection with explicit settings
    pub fn with_config(config: ConnectionConfig, handler: impl SensorHandler + 'static) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            shared: Arc::new(Shared {
                state: ConnectionStateManager::new(),
                writer: tokio::sync::Mutex::new(None),
            }),
            receiver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.current_state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Recent state transitions, newest first
    pub fn recent_transitions(&self, count: usize) -> Vec<StateTransition> {
        self.shared.state.recent_transitions(count)
    }

    /// Identifier of the current session, if connected
    pub fn session_id(&self) -> Option<Uuid> {
        if !self.is_connected() {
            return None;
        }
        self.receiver.lock().as_ref().map(|h| h.session_id)
    }

    /// Address of the Scratch peer, if connected
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        if !self.is_connected() {
            return None;
        }
        self.receiver.lock().as_ref().map(|h| h.peer)
    }

    /// Connect to the configured host and port
    pub async fn connect(&self) -> Result<()> {
        let host = self.config.host.clone();
        self.connect_to(&host, self.config.port).await
    }

    /// Connect to Scratch and start the receive loop.
    ///
    /// Fails with [`Error::AlreadyConnected`] if a connection is open or
    /// being opened.
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<()> {
        if !self.shared.state.begin_connecting() {
            return Err(Error::AlreadyConnected);
        }

        let addr = format!("{}:{}", host, port);
        info!(addr = %addr, "Connecting to Scratch");

        let stream = match timeout(self.config.connect_timeout(), TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.connect_failed(addr, e)),
            Err(_) => {
                let e = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                return Err(self.connect_failed(addr, e));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        let peer = stream.peer_addr().map_err(|e| self.connect_failed(addr.clone(), e))?;

        let (read_half, write_half) = stream.into_split();
        *self.shared.writer.lock().await = Some(write_half);

        let session_id = Uuid::new_v4();
        let (stop_tx, stop_rx) = watch::channel(false);

        let started = {
            let mut slot = self.receiver.lock();
            // Fails if this attempt was cancelled or another one took over
            let connected = self.shared.state.set_connected();
            if connected {
                let receiver = Receiver::new(
                    read_half,
                    stop_rx,
                    Arc::clone(&self.handler),
                    Arc::clone(&self.shared),
                    self.config.max_frame_bytes,
                    self.config.read_timeout(),
                    session_id,
                );
                *slot = Some(ReceiverHandle {
                    stop: stop_tx,
                    task: tokio::spawn(receiver.run()),
                    session_id,
                    peer,
                });
            }
            connected
        };

        if !started {
            // disconnect() ran while we were dialing
            self.shared.writer.lock().await.take();
            return Err(Error::Connection {
                addr,
                source: io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "disconnected while connecting",
                ),
            });
        }

        info!(addr = %addr, peer = %peer, session_id = %session_id, "Connected to Scratch");
        Ok(())
    }

    fn connect_failed(&self, addr: String, source: io::Error) -> Error {
        warn!(addr = %addr, error = %source, "Connection failed");
        self.shared.state.set_disconnected(Some(format!("Connect failed: {}", source)));
        Error::Connection { addr, source }
    }

    /// Stop the receive loop and close the socket.
    ///
    /// Does nothing when already disconnected.
    pub async fn disconnect(&self) {
        self.teardown("Disconnect requested").await;
    }

    async fn teardown(&self, reason: &str) {
        let handle = self.receiver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.stop.send(true);
            match handle.task.await {
                Ok(exit) => debug!(session_id = %handle.session_id, ?exit, "Receive loop joined"),
                Err(e) => error!(session_id = %handle.session_id, error = %e, "Receive loop task failed"),
            }
        }

        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Socket shutdown failed");
            }
        }

        self.shared.state.set_disconnected(Some(reason.to_string()));
    }

    /// Send a `broadcast` message
    pub async fn send_broadcast(&self, message: &str) -> Result<()> {
        self.send(&Command::broadcast(message)).await
    }

    /// Send a `sensor-update` with the given entries, in order
    pub async fn send_sensor_update<I, K, V>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SensorValue>,
    {
        let command = Command::sensor_update(entries)?;
        self.send(&command).await
    }

    /// Encode and write one command.
    ///
    /// A write failure closes the connection and stops the receive loop.
    pub async fn send(&self, command: &Command) -> Result<()> {
        let payload = command.to_wire();

        let mut guard = self.shared.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) if self.shared.state.is_connected() => writer,
            _ => return Err(Error::NotConnected),
        };

        if payload.len() > self.config.max_frame_bytes {
            return Err(Error::InvalidCommand(format!(
                "{} byte payload exceeds the {} byte frame limit",
                payload.len(),
                self.config.max_frame_bytes
            )));
        }

        match codec::write_frame(writer, payload.as_bytes(), self.config.max_frame_bytes).await {
            Ok(()) => {
                debug!(kind = command.kind(), bytes = payload.len(), "Frame sent");
                Ok(())
            }
            Err(e) => {
                guard.take();
                drop(guard);
                error!(kind = command.kind(), error = %e, "Send failed, closing connection");
                self.teardown("Send failed").await;
                Err(Error::Send(into_io(e)))
            }
        }
    }
}

fn into_io(e: crate::error::FramingError) -> io::Error {
    match e {
        crate::error::FramingError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

impl std::fmt::Debug for RemoteSensorConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSensorConnection")
            .field("addr", &self.config.addr())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for RemoteSensorConnection {
    fn drop(&mut self) {
        // The loop exits on its own once the stop flag flips
        if let Some(handle) = self.receiver.get_mut().take() {
            let _ = handle.stop.send(true);
        }
    }
}
