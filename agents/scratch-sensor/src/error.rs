//! Error Types
//!
//! Errors surfaced by the remote sensor connection, the frame codec and the
//! command parser.

use std::io;

/// Alias for `Result<T, scratch_sensor::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by connection operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connecting to Scratch failed (refused, unreachable or timed out)
    #[error("failed to connect to {addr}: {source}")]
    Connection {
        /// The `host:port` that was dialed
        addr: String,
        #[source]
        source: io::Error,
    },

    /// `connect` was called on a connection that is already connecting or connected
    #[error("already connected")]
    AlreadyConnected,

    /// An operation that needs a live socket was called while disconnected
    #[error("not connected")]
    NotConnected,

    /// Writing a frame to an established connection failed
    #[error("failed to send frame: {0}")]
    Send(#[source] io::Error),

    /// The command cannot be put on the wire
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Malformed or truncated frame
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Frame payload does not match the command grammar
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Wire framing errors. Fatal to the connection they occur on.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The stream closed in the middle of a frame
    #[error("stream closed mid-frame: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    /// Declared length exceeds the configured maximum
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    /// A started frame did not complete within the read timeout
    #[error("timed out waiting for the rest of a frame")]
    Timeout,

    /// Underlying socket error
    #[error("I/O error while reading frame: {0}")]
    Io(#[from] io::Error),
}

/// Command grammar errors. The offending frame is dropped and the
/// connection keeps running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown message kind `{0}`")]
    UnknownKind(String),

    #[error("unbalanced quote starting at byte {0}")]
    UnbalancedQuote(usize),

    #[error("unexpected character `{ch}` at byte {pos}")]
    UnexpectedCharacter { ch: char, pos: usize },

    #[error("malformed number `{0}`")]
    InvalidNumber(String),

    #[error("broadcast takes exactly one quoted message, got {0} arguments")]
    BroadcastArity(usize),

    #[error("expected a quoted string, found `{0}`")]
    ExpectedQuoted(String),

    #[error("sensor-update carries no entries")]
    NoEntries,

    #[error("sensor `{0}` has no value")]
    MissingValue(String),

    #[error("sensor `{0}` appears more than once")]
    DuplicateName(String),
}
