use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of one invocation of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        OperationId(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Shared error stored in a faulted handle.
pub type OperationFault = Arc<dyn Error + Send + Sync + 'static>;

/// Lifecycle of an operation handle.
#[derive(Debug, Clone)]
pub enum OperationStatus<T = ()> {
    Running,
    Completed(T),
    Faulted(OperationFault),
    Canceled,
}

impl<T> OperationStatus<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Running)
    }
}

/// Cloneable, awaitable view of an in-flight asynchronous operation.
///
/// Every clone observes the same status. The handle does not own the task
/// driving the operation; dropping all handles does not stop it.
pub struct OperationHandle<T = ()> {
    id: OperationId,
    status: watch::Receiver<OperationStatus<T>>,
}

impl<T> Clone for OperationHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            status: self.status.clone(),
        }
    }
}

impl<T> fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.status.borrow() {
            OperationStatus::Running => "Running",
            OperationStatus::Completed(_) => "Completed",
            OperationStatus::Faulted(_) => "Faulted",
            OperationStatus::Canceled => "Canceled",
        };
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("status", &state)
            .finish()
    }
}

impl<T: Clone> OperationHandle<T> {
    /// An already-completed handle carrying `value`.
    pub fn completed(value: T) -> Self {
        Self::settled(OperationStatus::Completed(value))
    }

    /// An already-faulted handle.
    pub fn faulted(error: impl Error + Send + Sync + 'static) -> Self {
        Self::settled(OperationStatus::Faulted(Arc::new(error)))
    }

    fn settled(status: OperationStatus<T>) -> Self {
        let (_tx, rx) = watch::channel(status);
        Self {
            id: OperationId::next(),
            status: rx,
        }
    }

    /// A running handle paired with the completer that settles it.
    pub fn pending() -> (Self, OperationCompleter<T>) {
        let (tx, rx) = watch::channel(OperationStatus::Running);
        let handle = Self {
            id: OperationId::next(),
            status: rx,
        };
        (handle, OperationCompleter { tx: Some(tx) })
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> OperationStatus<T> {
        self.status.borrow().clone()
    }

    pub fn is_completed(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    pub fn is_completed_successfully(&self) -> bool {
        matches!(&*self.status.borrow(), OperationStatus::Completed(_))
    }

    pub fn is_faulted(&self) -> bool {
        matches!(&*self.status.borrow(), OperationStatus::Faulted(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(&*self.status.borrow(), OperationStatus::Canceled)
    }

    /// The fault captured by this handle, if any.
    pub fn fault(&self) -> Option<OperationFault> {
        match &*self.status.borrow() {
            OperationStatus::Faulted(error) => Some(Arc::clone(error)),
            _ => None,
        }
    }

    /// The result if the operation completed successfully.
    pub fn result(&self) -> Option<T> {
        match &*self.status.borrow() {
            OperationStatus::Completed(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The result if the operation completed successfully, else `T::default()`.
    pub fn result_or_default(&self) -> T
    where
        T: Default,
    {
        self.result().unwrap_or_default()
    }

    /// Wait until the operation settles and return its final status.
    pub async fn wait(&self) -> OperationStatus<T> {
        let mut status = self.status.clone();
        loop {
            {
                let current = status.borrow_and_update();
                if current.is_terminal() {
                    return current.clone();
                }
            }
            if status.changed().await.is_err() {
                // Sender gone while still Running.
                let current = status.borrow().clone();
                return match current {
                    OperationStatus::Running => OperationStatus::Canceled,
                    other => other,
                };
            }
        }
    }
}

/// Write side of a pending [`OperationHandle`].
///
/// Dropping it without calling [`complete`](Self::complete) settles the
/// handle as [`OperationStatus::Canceled`].
pub struct OperationCompleter<T = ()> {
    tx: Option<watch::Sender<OperationStatus<T>>>,
}

impl<T> OperationCompleter<T> {
    pub fn complete(mut self, status: OperationStatus<T>) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(status);
        }
    }
}

impl<T> Drop for OperationCompleter<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(OperationStatus::Canceled);
        }
    }
}
