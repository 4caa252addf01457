use thiserror::Error;

/// Boxed error type returned by command executors and predicates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by commands and captured inside operation handles.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The can-execute predicate itself failed.
    #[error("can-execute predicate of `{command}` failed: {source}")]
    CanExecute {
        command: &'static str,
        #[source]
        source: BoxError,
    },

    /// The executor panicked while running.
    #[error("executor panicked: {0}")]
    Panicked(String),

    /// `execute_async` was called outside of a tokio runtime.
    #[error("no tokio runtime available to drive the operation")]
    NoRuntime,
}

/// Errors returned by [`Ioc`](crate::Ioc) and [`ServiceProvider`](crate::ServiceProvider).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IocError {
    #[error("the service provider has already been configured")]
    AlreadyConfigured,

    #[error("the service provider has not been configured yet")]
    NotConfigured,

    #[error("no service registered for `{0}`")]
    ServiceNotRegistered(&'static str),

    /// A lazy singleton factory asked for the service it is building.
    #[error("`{0}` was resolved while its lazy singleton was being built")]
    RecursiveResolution(&'static str),
}
