//! Dispatch Boundary
//!
//! Routes a decoded command to the matching handler method. Errors and
//! panics raised by user code stop here.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::connection::protocol::Command;
use crate::handler::SensorHandler;

/// Outcome of handing one command to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// The handler returned `Ok`
    Handled,
    /// The handler returned an error, which was logged
    Failed,
    /// The handler panicked; the panic was caught and logged
    Panicked,
}

/// Invoke the handler method for `command`
pub fn dispatch(handler: &dyn SensorHandler, command: &Command) -> Dispatched {
    debug!(kind = command.kind(), "Dispatching message");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match command {
        Command::Broadcast(message) => handler.on_broadcast(message),
        Command::SensorUpdate(update) => handler.on_sensor_update(update),
    }));

    match outcome {
        Ok(Ok(())) => Dispatched::Handled,
        Ok(Err(e)) => {
            error!(kind = command.kind(), error = %e, "Handler failed");
            Dispatched::Failed
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(kind = command.kind(), panic = %reason, "Handler panicked");
            Dispatched::Panicked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::protocol::SensorUpdate;
    use crate::handler::Handlers;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_routes_by_kind() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let broadcasts = seen.clone();
        let updates = seen.clone();
        let handlers = Handlers::new()
            .on_broadcast(move |m| {
                broadcasts.lock().push(format!("b:{}", m));
                Ok(())
            })
            .on_sensor_update(move |u| {
                updates.lock().push(format!("s:{}", u.len()));
                Ok(())
            });

        let update = Command::sensor_update([("x", 1), ("y", 2)]).unwrap();
        assert_eq!(dispatch(&handlers, &Command::broadcast("go")), Dispatched::Handled);
        assert_eq!(dispatch(&handlers, &update), Dispatched::Handled);
        assert_eq!(*seen.lock(), vec!["b:go".to_string(), "s:2".to_string()]);
    }

    #[test]
    fn test_absent_slot_drops_silently() {
        let handlers = Handlers::new();
        assert_eq!(dispatch(&handlers, &Command::broadcast("ignored")), Dispatched::Handled);
    }

    #[test]
    fn test_handler_error_is_contained() {
        let handlers = Handlers::new().on_broadcast(|_| anyhow::bail!("boom"));
        assert_eq!(dispatch(&handlers, &Command::broadcast("x")), Dispatched::Failed);
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let handlers = Handlers::new().on_sensor_update(|_: &SensorUpdate| panic!("sensor exploded"));
        let update = Command::sensor_update([("x", 1)]).unwrap();
        assert_eq!(dispatch(&handlers, &update), Dispatched::Panicked);
    }

    struct OnlyBroadcasts(Mutex<u32>);

    impl SensorHandler for OnlyBroadcasts {
        fn on_broadcast(&self, _message: &str) -> anyhow::Result<()> {
            *self.0.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_trait_defaults_ignore_messages() {
        let handler = OnlyBroadcasts(Mutex::new(0));
        dispatch(&handler, &Command::sensor_update([("x", 1)]).unwrap());
        dispatch(&handler, &Command::broadcast("a"));
        assert_eq!(*handler.0.lock(), 1);
    }
}
