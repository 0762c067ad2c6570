//! Handler module
//!
//! Callbacks invoked by the receive loop for incoming broadcasts and
//! sensor updates, and the dispatch boundary that isolates their failures.

pub mod dispatch;

use anyhow::Result;

use crate::connection::protocol::SensorUpdate;

/// Receiver of decoded Scratch messages.
///
/// Both methods default to ignoring the message. They run on the receive
/// loop task, so long-running work should be handed off elsewhere.
pub trait SensorHandler: Send + Sync {
    /// Called for every `broadcast` from Scratch
    fn on_broadcast(&self, _message: &str) -> Result<()> {
        Ok(())
    }

    /// Called for every `sensor-update` from Scratch
    fn on_sensor_update(&self, _update: &SensorUpdate) -> Result<()> {
        Ok(())
    }
}

type BroadcastFn = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;
type SensorUpdateFn = Box<dyn Fn(&SensorUpdate) -> Result<()> + Send + Sync>;

/// Closure-based handler with two optional slots
#[derive(Default)]
pub struct Handlers {
    broadcast: Option<BroadcastFn>,
    sensor_update: Option<SensorUpdateFn>,
}

impl Handlers {
    /// Create handlers with both slots empty
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broadcast callback
    pub fn on_broadcast<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.broadcast = Some(Box::new(f));
        self
    }

    /// Set the sensor-update callback
    pub fn on_sensor_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&SensorUpdate) -> Result<()> + Send + Sync + 'static,
    {
        self.sensor_update = Some(Box::new(f));
        self
    }

    pub fn has_broadcast(&self) -> bool {
        self.broadcast.is_some()
    }

    pub fn has_sensor_update(&self) -> bool {
        self.sensor_update.is_some()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("broadcast", &self.has_broadcast())
            .field("sensor_update", &self.has_sensor_update())
            .finish()
    }
}

impl SensorHandler for Handlers {
    fn on_broadcast(&self, message: &str) -> Result<()> {
        match &self.broadcast {
            Some(f) => f(message),
            None => {
                tracing::trace!(broadcast = %message, "No broadcast handler bound, dropping");
                Ok(())
            }
        }
    }

    fn on_sensor_update(&self, update: &SensorUpdate) -> Result<()> {
        match &self.sensor_update {
            Some(f) => f(update),
            None => {
                tracing::trace!(entries = update.len(), "No sensor-update handler bound, dropping");
                Ok(())
            }
        }
    }
}
