use crate::observation::{Observation, Property};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Observer function type
pub type ObserverFn = Arc<dyn Fn(&Observation) + Send + Sync>;

/// No-op observer
pub fn no_op_observer() -> ObserverFn {
    Arc::new(|_observation: &Observation| {})
}

/// Tracing observer - logs to tracing crate
pub fn tracing_observer() -> ObserverFn {
    Arc::new(move |observation: &Observation| match observation {
        Observation::PropertyChanged {
            command,
            property,
            value,
            ..
        } => {
            tracing::debug!(target: "relay-core::Property", "{}.{} = {}", command, property, value);
        }
        Observation::ExecutionChanged {
            command, operation, ..
        } => {
            tracing::info!(target: "relay-core::Command", "{} started {}", command, operation);
        }
        Observation::CanExecuteChanged { command, .. } => {
            tracing::trace!(target: "relay-core::Command", "{} can-execute changed", command);
        }
        Observation::Faulted {
            command,
            operation,
            error,
            ..
        } => {
            tracing::error!(target: "relay-core::Command", "{} {} faulted: {}", command, operation, error);
        }
    })
}

/// Filter observer - include/exclude kinds
pub fn filter_observer(
    wrapped: ObserverFn,
    include_properties: bool,
    include_executions: bool,
    include_can_execute: bool,
) -> ObserverFn {
    Arc::new(move |observation: &Observation| {
        let should_pass = match observation {
            Observation::PropertyChanged { .. } => include_properties,
            Observation::ExecutionChanged { .. } | Observation::Faulted { .. } => {
                include_executions
            }
            Observation::CanExecuteChanged { .. } => include_can_execute,
        };

        if should_pass {
            wrapped(observation);
        }
    })
}

/// Filter observer with custom predicate
pub fn filter_with<F>(wrapped: ObserverFn, predicate: F) -> ObserverFn
where
    F: Fn(&Observation) -> bool + Send + Sync + 'static,
{
    Arc::new(move |observation: &Observation| {
        if predicate(observation) {
            wrapped(observation);
        }
    })
}

/// Only forwards changes of a single property.
pub fn property_observer(
    property: Property,
    on_change: impl Fn(bool) + Send + Sync + 'static,
) -> ObserverFn {
    Arc::new(move |observation: &Observation| {
        if let Observation::PropertyChanged {
            property: changed,
            value,
            ..
        } = observation
        {
            if *changed == property {
                on_change(*value);
            }
        }
    })
}

/// Tee observer - call multiple observers
pub fn tee_observer(observers: Vec<ObserverFn>) -> ObserverFn {
    Arc::new(move |observation: &Observation| {
        for observer in &observers {
            observer(observation);
        }
    })
}

/// Channel observer - forwards every observation to an unbounded channel.
/// A closed receiver is ignored.
pub fn channel_observer(sender: UnboundedSender<Observation>) -> ObserverFn {
    Arc::new(move |observation: &Observation| {
        let _ = sender.send(observation.clone());
    })
}
