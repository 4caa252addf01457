use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, CommandError};
use crate::observation::Observation;
use crate::observer::{no_op_observer, ObserverFn};

/// Shared contract of synchronous and asynchronous commands.
pub trait Command {
    type Parameter;

    /// Whether the command can run with `parameter`. Predicate failures are
    /// logged and reported as `false`.
    fn can_execute(&self, parameter: &Self::Parameter) -> bool;

    /// Run the command, discarding any result.
    fn execute(&self, parameter: Self::Parameter);

    /// Tell observers that `can_execute` should be re-evaluated.
    fn notify_can_execute_changed(&self);
}

/// Behavior switches for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOptions {
    /// When false, `can_execute` is false while an operation is running.
    pub allow_concurrent_executions: bool,
    /// Log executor faults at error level when an operation settles.
    pub report_faults: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            allow_concurrent_executions: true,
            report_faults: true,
        }
    }
}

pub(crate) type Predicate<P> = Arc<dyn Fn(&P) -> Result<bool, BoxError> + Send + Sync>;

pub(crate) fn infallible<P, F>(predicate: F) -> Predicate<P>
where
    F: Fn(&P) -> bool + Send + Sync + 'static,
{
    Arc::new(move |parameter: &P| Ok(predicate(parameter)))
}

pub(crate) fn fallible<P, F, E>(predicate: F) -> Predicate<P>
where
    F: Fn(&P) -> Result<bool, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    Arc::new(move |parameter: &P| predicate(parameter).map_err(Into::into))
}

/// Evaluate an optional predicate; absent means "always executable".
pub(crate) fn evaluate<P>(
    command: &'static str,
    predicate: Option<&Predicate<P>>,
    parameter: &P,
) -> Result<bool, CommandError> {
    match predicate {
        None => Ok(true),
        Some(predicate) => {
            predicate(parameter).map_err(|source| CommandError::CanExecute { command, source })
        }
    }
}

/// Collapse a predicate failure into `false`, logging it.
pub(crate) fn or_not_executable(result: Result<bool, CommandError>) -> bool {
    result.unwrap_or_else(|error| {
        tracing::warn!(target: "relay-core::Command", "{}", error);
        false
    })
}

/// Name and observer shared by every command kind.
pub(crate) struct Notifier {
    pub(crate) name: &'static str,
    observer: ObserverFn,
}

impl Notifier {
    pub(crate) fn new(name: &'static str, observer: Option<ObserverFn>) -> Self {
        Self {
            name,
            observer: observer.unwrap_or_else(no_op_observer),
        }
    }

    pub(crate) fn emit(&self, observation: Observation) {
        (self.observer)(&observation);
    }

    pub(crate) fn can_execute_changed(&self) {
        self.emit(Observation::CanExecuteChanged {
            ts: SystemTime::now(),
            command: self.name,
        });
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
