//! Connection module
//!
//! This module handles all communication with Scratch: frame codec, command
//! protocol, connection state and the TCP client with its receive loop.

pub mod client;
pub mod codec;
pub mod protocol;
pub mod receiver;
pub mod state;
