//! Scratch Remote Sensor Library
//!
//! This crate provides a client for the Scratch Remote Sensor Protocol,
//! including frame encoding, command parsing, the background receive loop
//! and handler dispatch for broadcasts and sensor updates.
//!
//! ```no_run
//! use scratch_sensor::{Handlers, RemoteSensorConnection};
//!
//! # async fn run() -> scratch_sensor::Result<()> {
//! let handlers = Handlers::new()
//!     .on_broadcast(|message| {
//!         println!("broadcast: {}", message);
//!         Ok(())
//!     });
//!
//! let conn = RemoteSensorConnection::new(handlers);
//! conn.connect().await?;
//! conn.send_broadcast("hello").await?;
//! conn.send_sensor_update([("temperature", 21.5)]).await?;
//! conn.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;

// Re-exports for convenience
pub use config::{Config, ConnectionConfig, LoggingConfig, DEFAULT_PORT};
pub use connection::client::RemoteSensorConnection;
pub use connection::protocol::{Command, SensorUpdate, SensorValue};
pub use connection::state::{ConnectionState, StateTransition};
pub use error::{Error, FramingError, ParseError, Result};
pub use handler::{Handlers, SensorHandler};
