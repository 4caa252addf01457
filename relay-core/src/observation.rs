use std::fmt;
use std::time::SystemTime;

use crate::operation::{OperationFault, OperationId};

/// Observable properties of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    IsRunning,
    CanBeCanceled,
    IsCancellationRequested,
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Property::IsRunning => "IsRunning",
            Property::CanBeCanceled => "CanBeCanceled",
            Property::IsCancellationRequested => "IsCancellationRequested",
        })
    }
}

/// Notifications published by commands.
///
/// Carries the command name so a single observer can be shared between
/// several commands and still tell them apart.
#[derive(Debug, Clone)]
pub enum Observation {
    /// A boolean property flipped.
    PropertyChanged {
        ts: SystemTime,
        command: &'static str,
        property: Property,
        value: bool,
    },
    /// A new operation handle replaced the previous one.
    ExecutionChanged {
        ts: SystemTime,
        command: &'static str,
        operation: OperationId,
    },
    /// The result of `can_execute` may have changed.
    CanExecuteChanged {
        ts: SystemTime,
        command: &'static str,
    },
    /// An operation settled with a fault.
    Faulted {
        ts: SystemTime,
        command: &'static str,
        operation: OperationId,
        error: OperationFault,
    },
}

impl Observation {
    pub fn command(&self) -> &'static str {
        match self {
            Observation::PropertyChanged { command, .. }
            | Observation::ExecutionChanged { command, .. }
            | Observation::CanExecuteChanged { command, .. }
            | Observation::Faulted { command, .. } => command,
        }
    }
}
