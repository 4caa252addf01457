use std::sync::Arc;

use crate::command::{
    evaluate, fallible, infallible, or_not_executable, Command, Notifier, Predicate,
};
use crate::error::{BoxError, CommandError};
use crate::observer::ObserverFn;

struct Inner<P> {
    notifier: Notifier,
    action: Box<dyn Fn(P) + Send + Sync>,
    can_execute: Option<Predicate<P>>,
}

/// Synchronous command running `action` on the calling thread.
pub struct RelayCommand<P = ()> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for RelayCommand<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct RelayCommandBuilder<P> {
    name: &'static str,
    action: Box<dyn Fn(P) + Send + Sync>,
    can_execute: Option<Predicate<P>>,
    observer: Option<ObserverFn>,
}

impl<P: 'static> RelayCommandBuilder<P> {
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn can_execute(mut self, predicate: impl Fn(&P) -> bool + Send + Sync + 'static) -> Self {
        self.can_execute = Some(infallible(predicate));
        self
    }

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

    pub fn observer(mut self, observer: ObserverFn) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> RelayCommand<P> {
        RelayCommand {
            inner: Arc::new(Inner {
                notifier: Notifier::new(self.name, self.observer),
                action: self.action,
                can_execute: self.can_execute,
            }),
        }
    }
}

impl<P: 'static> RelayCommand<P> {
    pub fn new(action: impl Fn(P) + Send + Sync + 'static) -> Self {
        Self::builder(action).build()
    }

    pub fn builder(action: impl Fn(P) + Send + Sync + 'static) -> RelayCommandBuilder<P> {
        RelayCommandBuilder {
            name: "RelayCommand",
            action: Box::new(action),
            can_execute: None,
            observer: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.notifier.name
    }

    pub fn try_can_execute(&self, parameter: &P) -> Result<bool, CommandError> {
        evaluate(
            self.inner.notifier.name,
            self.inner.can_execute.as_ref(),
            parameter,
        )
    }
}

impl<P: 'static> Command for RelayCommand<P> {
    type Parameter = P;

    fn can_execute(&self, parameter: &P) -> bool {
        or_not_executable(self.try_can_execute(parameter))
    }

    /// Runs the action only when `can_execute` holds.
    fn execute(&self, parameter: P) {
        if self.can_execute(&parameter) {
            (self.inner.action)(parameter);
        } else {
            tracing::debug!(target: "relay-core::Command", "{} not executable, skipping", self.inner.notifier.name);
        }
    }

    fn notify_can_execute_changed(&self) {
        self.inner.notifier.can_execute_changed();
    }
}
