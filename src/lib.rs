//! Relay: cancellable async commands and batched parallel dispatch.
//!
//! Re-exports [`relay_core`] and [`relay_parallel`] and adds a TOML
//! configuration layer covering both.

mod config;

pub use config::{ConfigError, RelayConfig};
pub use relay_core;
pub use relay_parallel;

pub use relay_core::{
    AsyncCommand, CancellationToken, Command, CommandOptions, Ioc, OperationHandle,
    OperationStatus, RelayCommand, ServiceCollection, ServiceProvider,
};
pub use relay_parallel::{BatchPlan, DispatchError, Limit, ParallelDispatcher, ParallelOptions};
