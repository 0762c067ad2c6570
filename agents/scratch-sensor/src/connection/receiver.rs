//! Receive Loop
//!
//! Background task that reads frames from the socket, parses them and hands
//! the resulting commands to the dispatch boundary. A stop request also
//! interrupts a frame that has started arriving; the partial frame is
//! dropped with the socket.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connection::client::Shared;
use crate::connection::codec;
use crate::connection::protocol::Command;
use crate::error::FramingError;
use crate::handler::dispatch::dispatch;
use crate::handler::SensorHandler;

/// Why the receive loop ended
#[derive(Debug)]
pub enum LoopExit {
    /// `disconnect` asked the loop to stop
    Stopped,
    /// The peer closed the socket on a frame boundary
    PeerClosed,
    /// Malformed, truncated or timed-out frame, or a socket error
    Framing(FramingError),
}

pub(crate) struct Receiver {
    reader: BufReader<OwnedReadHalf>,
    stop: watch::Receiver<bool>,
    handler: Arc<dyn SensorHandler>,
    shared: Arc<Shared>,
    max_frame: usize,
    read_timeout: Option<Duration>,
    session_id: Uuid,
}

impl Receiver {
    pub(crate) fn new(
        read_half: OwnedReadHalf,
        stop: watch::Receiver<bool>,
        handler: Arc<dyn SensorHandler>,
        shared: Arc<Shared>,
        max_frame: usize,
        read_timeout: Option<Duration>,
        session_id: Uuid,
    ) -> Self {
        Self {
            reader: BufReader::new(read_half),
            stop,
            handler,
            shared,
            max_frame,
            read_timeout,
            session_id,
        }
    }

    /// Run until stopped or the connection fails
    pub(crate) async fn run(mut self) -> LoopExit {
        debug!(session_id = %self.session_id, "Receive loop started");

        let exit = self.receive().await;
        match &exit {
            LoopExit::Stopped => {
                debug!(session_id = %self.session_id, "Receive loop stopped");
            }
            LoopExit::PeerClosed => {
                info!(session_id = %self.session_id, "Scratch closed the connection");
                self.shared.close_after_failure("Peer closed connection").await;
            }
            LoopExit::Framing(e) => {
                error!(session_id = %self.session_id, error = %e, "Framing error, dropping connection");
                self.shared
                    .close_after_failure(&format!("Framing error: {}", e))
                    .await;
            }
        }
        exit
    }

    async fn receive(&mut self) -> LoopExit {
        loop {
            if *self.stop.borrow() {
                return LoopExit::Stopped;
            }

            // Wait for the next frame to start without consuming anything
            let readable = tokio::select! {
                biased;
                _ = self.stop.changed() => return LoopExit::Stopped,
                res = self.reader.fill_buf() => res.map(|buf| !buf.is_empty()),
            };

            match readable {
                Ok(true) => {}
                Ok(false) => return LoopExit::PeerClosed,
                Err(e) if is_peer_gone(&e) => return LoopExit::PeerClosed,
                Err(e) => return LoopExit::Framing(FramingError::Io(e)),
            }

            let (reader, max_frame, read_timeout) = (&mut self.reader, self.max_frame, self.read_timeout);
            let read = async move {
                match read_timeout {
                    Some(limit) => timeout(limit, codec::read_frame(reader, max_frame))
                        .await
                        .unwrap_or(Err(FramingError::Timeout)),
                    None => codec::read_frame(reader, max_frame).await,
                }
            };

            // Teardown closes the socket right after, nothing reads the rest
            let frame = tokio::select! {
                biased;
                _ = self.stop.changed() => {
                    debug!(session_id = %self.session_id, "Stop requested mid-frame, discarding partial frame");
                    return LoopExit::Stopped;
                }
                frame = read => frame,
            };

            let payload = match frame {
                Ok(Some(payload)) => payload,
                Ok(None) => return LoopExit::PeerClosed,
                Err(e) => return LoopExit::Framing(e),
            };

            match Command::from_bytes(&payload) {
                Ok(command) => {
                    dispatch(self.handler.as_ref(), &command);
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        payload = %String::from_utf8_lossy(&payload),
                        "Dropping unparseable frame"
                    );
                }
            }
        }
    }
}

fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
