//! Cancellable asynchronous commands.
//!
//! An [`AsyncCommand`] wraps an async executor so it can be started from a
//! synchronous call site. Every invocation produces a fresh
//! [`OperationHandle`]; the command keeps the latest one and publishes
//! property changes through its observer as operations start, get canceled
//! and settle.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use futures::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::command::{
    evaluate, fallible, infallible, lock, or_not_executable, Command, CommandOptions, Notifier,
    Predicate,
};
use crate::error::{BoxError, CommandError};
use crate::observation::{Observation, Property};
use crate::observer::ObserverFn;
use crate::operation::{
    OperationCompleter, OperationFault, OperationHandle, OperationId, OperationStatus,
};

type ExecFuture = BoxFuture<'static, Result<(), BoxError>>;

enum Executor<P> {
    Plain(Arc<dyn Fn(P) -> ExecFuture + Send + Sync>),
    Cancellable(Arc<dyn Fn(P, CancellationToken) -> ExecFuture + Send + Sync>),
}

#[derive(Default)]
struct State {
    current: Option<OperationHandle>,
    token: Option<CancellationToken>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Published {
    is_running: bool,
    can_be_canceled: bool,
    is_cancellation_requested: bool,
}

struct Inner<P> {
    notifier: Notifier,
    executor: Executor<P>,
    can_execute: Option<Predicate<P>>,
    options: CommandOptions,
    state: Mutex<State>,
    // Held while diffing and emitting so one command never interleaves
    // notifications.
    published: Mutex<Published>,
}

/// Asynchronous command over an executor taking a parameter of type `P`.
///
/// Cloning yields another reference to the same command.
pub struct AsyncCommand<P = ()> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for AsyncCommand<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Configures an [`AsyncCommand`] before it is shared.
pub struct AsyncCommandBuilder<P> {
    name: &'static str,
    executor: Executor<P>,
    can_execute: Option<Predicate<P>>,
    options: CommandOptions,
    observer: Option<ObserverFn>,
}

impl<P: Send + 'static> AsyncCommandBuilder<P> {
    fn with_executor(executor: Executor<P>) -> Self {
        Self {
            name: "AsyncCommand",
            executor,
            can_execute: None,
            options: CommandOptions::default(),
            observer: None,
        }
    }

    /// Name used in observations and log events.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn can_execute(mut self, predicate: impl Fn(&P) -> bool + Send + Sync + 'static) -> Self {
        self.can_execute = Some(infallible(predicate));
        self
    }

    /// A predicate that may fail; failures count as "not executable".
    pub fn try_can_execute<E>(
        mut self,
        predicate: impl Fn(&P) -> Result<bool, E> + Send + Sync + 'static,
    ) -> Self
    where
        E: Into<BoxError>,
    {
        self.can_execute = Some(fallible(predicate));
        self
    }

    pub fn options(mut self, options: CommandOptions) -> Self {
        self.options = options;
        self
    }

    pub fn observer(mut self, observer: ObserverFn) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> AsyncCommand<P> {
        AsyncCommand {
            inner: Arc::new(Inner {
                notifier: Notifier::new(self.name, self.observer),
                executor: self.executor,
                can_execute: self.can_execute,
                options: self.options,
                state: Mutex::new(State::default()),
                published: Mutex::new(Published::default()),
            }),
        }
    }
}

impl<P: Send + 'static> AsyncCommand<P> {
    /// Command over an executor that cannot be canceled.
    pub fn new<F, Fut, E>(executor: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::builder(executor).build()
    }

    /// Command over an executor that receives a cancellation token.
    pub fn cancellable<F, Fut, E>(executor: F) -> Self
    where
        F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::cancellable_builder(executor).build()
    }

    pub fn builder<F, Fut, E>(executor: F) -> AsyncCommandBuilder<P>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        AsyncCommandBuilder::with_executor(Executor::Plain(Arc::new(
            move |parameter: P| -> ExecFuture {
                executor(parameter).map(|r| r.map_err(Into::into)).boxed()
            },
        )))
    }

    pub fn cancellable_builder<F, Fut, E>(executor: F) -> AsyncCommandBuilder<P>
    where
        F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        AsyncCommandBuilder::with_executor(Executor::Cancellable(Arc::new(
            move |parameter: P, token: CancellationToken| -> ExecFuture {
                executor(parameter, token)
                    .map(|r| r.map_err(Into::into))
                    .boxed()
            },
        )))
    }

    pub fn name(&self) -> &'static str {
        self.inner.notifier.name
    }

    pub fn options(&self) -> CommandOptions {
        self.inner.options
    }

    /// Evaluate the predicate, propagating its failure.
    pub fn try_can_execute(&self, parameter: &P) -> Result<bool, CommandError> {
        if !self.inner.options.allow_concurrent_executions && self.is_running() {
            return Ok(false);
        }
        evaluate(
            self.inner.notifier.name,
            self.inner.can_execute.as_ref(),
            parameter,
        )
    }

    /// Start the executor and return the handle of the new operation.
    ///
    /// Returns an already-completed handle without touching the current
    /// operation when the command cannot execute. Must be called from within
    /// a tokio runtime; otherwise the returned handle is faulted with
    /// [`CommandError::NoRuntime`]. Never panics: an executor panicking
    /// while producing its future yields a handle faulted with
    /// [`CommandError::Panicked`] and leaves the current operation as it was.
    pub fn execute_async(&self, parameter: P) -> OperationHandle {
        let inner = &self.inner;
        if !self.can_execute(&parameter) {
            tracing::debug!(target: "relay-core::Command", "{} not executable, skipping", inner.notifier.name);
            return OperationHandle::completed(());
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::error!(target: "relay-core::Command", "{} executed outside a tokio runtime", inner.notifier.name);
                return OperationHandle::faulted(CommandError::NoRuntime);
            }
        };

        // A panic before the future is handed back faults the returned handle.
        let started = panic::catch_unwind(AssertUnwindSafe(|| match &inner.executor {
            Executor::Plain(executor) => (executor(parameter), None),
            Executor::Cancellable(executor) => {
                let previous = lock(&inner.state).token.clone();
                if let Some(previous) = previous {
                    previous.cancel();
                }
                let token = CancellationToken::new();
                (executor(parameter, token.clone()), Some(token))
            }
        }));
        let (future, token) = match started {
            Ok(started) => started,
            Err(panic) => {
                let handle =
                    OperationHandle::faulted(CommandError::Panicked(panic_message(&*panic)));
                if let Some(error) = handle.fault() {
                    inner.report_fault(handle.id(), &error);
                }
                inner.refresh();
                return handle;
            }
        };

        let (handle, completer) = OperationHandle::pending();
        inner.store_and_publish(&handle, token.as_ref());

        tracing::debug!(target: "relay-core::Command", "{} spawning {}", inner.notifier.name, handle.id());
        runtime.spawn(drive(
            future,
            completer,
            token,
            handle.id(),
            Arc::downgrade(inner),
        ));
        handle
    }

    /// Request cancellation of the current operation. No-op when nothing is
    /// running or the executor is not cancellable; safe to call repeatedly.
    pub fn cancel(&self) {
        let token = {
            let state = lock(&self.inner.state);
            let running = state
                .current
                .as_ref()
                .is_some_and(|handle| !handle.is_completed());
            if running {
                state.token.clone()
            } else {
                None
            }
        };
        if let Some(token) = token {
            if !token.is_cancelled() {
                tracing::debug!(target: "relay-core::Command", "{} cancellation requested", self.inner.notifier.name);
                token.cancel();
            }
            self.inner.refresh();
        }
    }

    /// Whether the most recent operation has not settled yet.
    pub fn is_running(&self) -> bool {
        self.inner.snapshot().is_running
    }

    /// Whether the executor is cancellable and an operation is running.
    pub fn can_be_canceled(&self) -> bool {
        self.inner.snapshot().can_be_canceled
    }

    /// Whether the current cancellation token has been triggered.
    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.snapshot().is_cancellation_requested
    }

    pub fn is_cancellation_supported(&self) -> bool {
        matches!(self.inner.executor, Executor::Cancellable(_))
    }

    /// Handle of the most recent operation, if any was started.
    pub fn execution_task(&self) -> Option<OperationHandle> {
        lock(&self.inner.state).current.clone()
    }
}

impl<P: Send + 'static> Command for AsyncCommand<P> {
    type Parameter = P;

    fn can_execute(&self, parameter: &P) -> bool {
        or_not_executable(self.try_can_execute(parameter))
    }

    fn execute(&self, parameter: P) {
        let _ = self.execute_async(parameter);
    }

    fn notify_can_execute_changed(&self) {
        self.inner.notifier.can_execute_changed();
    }
}

impl<P> Inner<P> {
    fn snapshot(&self) -> Published {
        let state = lock(&self.state);
        let is_running = state
            .current
            .as_ref()
            .is_some_and(|handle| !handle.is_completed());
        Published {
            is_running,
            can_be_canceled: is_running && matches!(self.executor, Executor::Cancellable(_)),
            is_cancellation_requested: state
                .token
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled),
        }
    }

    /// Store a freshly started operation and publish the change.
    ///
    /// Lock order is `published` then `state`, so the stored handle and the
    /// `ExecutionChanged` observation for it can never be reordered against
    /// another concurrent start.
    fn store_and_publish(&self, handle: &OperationHandle, token: Option<&CancellationToken>) {
        let mut published = lock(&self.published);
        {
            let mut state = lock(&self.state);
            if let Some(token) = token {
                // A concurrent call may have slipped in since the executor
                // was invoked.
                if let Some(previous) = state.token.replace(token.clone()) {
                    previous.cancel();
                }
            }
            state.current = Some(handle.clone());
        }
        self.notifier.emit(Observation::ExecutionChanged {
            ts: SystemTime::now(),
            command: self.notifier.name,
            operation: handle.id(),
        });
        self.diff(&mut published);
        drop(published);
        if !self.options.allow_concurrent_executions {
            self.notifier.can_execute_changed();
        }
    }

    /// Re-read state and emit one notification per flipped property.
    fn refresh(&self) {
        let mut published = lock(&self.published);
        self.diff(&mut published);
    }

    fn diff(&self, published: &mut Published) {
        let next = self.snapshot();
        let ts = SystemTime::now();
        let changes = [
            (Property::IsRunning, published.is_running, next.is_running),
            (
                Property::CanBeCanceled,
                published.can_be_canceled,
                next.can_be_canceled,
            ),
            (
                Property::IsCancellationRequested,
                published.is_cancellation_requested,
                next.is_cancellation_requested,
            ),
        ];
        *published = next;
        for (property, before, after) in changes {
            if before != after {
                self.notifier.emit(Observation::PropertyChanged {
                    ts,
                    command: self.notifier.name,
                    property,
                    value: after,
                });
            }
        }
    }

    fn report_fault(&self, operation: OperationId, error: &OperationFault) {
        if self.options.report_faults {
            tracing::error!(target: "relay-core::Command", "{} {} faulted: {}", self.notifier.name, operation, error);
        }
        self.notifier.emit(Observation::Faulted {
            ts: SystemTime::now(),
            command: self.notifier.name,
            operation,
            error: Arc::clone(error),
        });
    }

    fn on_settled(&self, operation: OperationId, status: &OperationStatus) {
        if let OperationStatus::Faulted(error) = status {
            self.report_fault(operation, error);
        }
        self.refresh();
        if !self.options.allow_concurrent_executions {
            self.notifier.can_execute_changed();
        }
    }
}

/// Run the executor future to completion, settle its handle and let the
/// command re-publish its state.
async fn drive<P>(
    future: ExecFuture,
    completer: OperationCompleter,
    token: Option<CancellationToken>,
    operation: OperationId,
    command: Weak<Inner<P>>,
) {
    let outcome = AssertUnwindSafe(future).catch_unwind().await;
    let status = match outcome {
        Ok(Ok(())) => OperationStatus::Completed(()),
        Ok(Err(_)) if token.as_ref().is_some_and(CancellationToken::is_cancelled) => {
            OperationStatus::Canceled
        }
        Ok(Err(error)) => OperationStatus::Faulted(Arc::from(error)),
        Err(panic) => {
            OperationStatus::Faulted(Arc::new(CommandError::Panicked(panic_message(&*panic))))
        }
    };
    tracing::trace!(target: "relay-core::Command", "{} settled", operation);
    completer.complete(status.clone());
    if let Some(command) = command.upgrade() {
        command.on_settled(operation, &status);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
