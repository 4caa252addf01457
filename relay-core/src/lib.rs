mod async_command;
mod command;
mod error;
mod ioc;
mod observation;
mod observer;
mod operation;
mod relay_command;

pub use async_command::{AsyncCommand, AsyncCommandBuilder};
pub use command::{Command, CommandOptions};
pub use error::{BoxError, CommandError, IocError};
pub use ioc::{Ioc, ServiceCollection, ServiceProvider};
pub use observation::{Observation, Property};
pub use observer::{
    channel_observer, filter_observer, filter_with, no_op_observer, property_observer,
    tee_observer, tracing_observer, ObserverFn,
};
pub use operation::{
    OperationCompleter, OperationFault, OperationHandle, OperationId, OperationStatus,
};
pub use relay_command::{RelayCommand, RelayCommandBuilder};
pub use tokio_util::sync::CancellationToken;
