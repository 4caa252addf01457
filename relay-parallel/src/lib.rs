//! Batched parallel dispatch over mutable buffers.
//!
//! The free functions use a dispatcher on the global rayon pool; build a
//! [`ParallelDispatcher`] to cap parallelism or reuse a dedicated pool.

mod dispatcher;
mod error;
mod limits;
mod plan;

use std::ops::Range;

pub use dispatcher::ParallelDispatcher;
pub use error::{BatchFault, DispatchError, InvalidMinimum, PoolError};
pub use limits::{Limit, ParallelOptions};
pub use plan::BatchPlan;

/// Apply `action` to every item of `buffer` on the global pool.
pub fn for_each<T, F>(
    buffer: &mut [T],
    action: F,
    minimum_actions_per_thread: usize,
) -> Result<(), DispatchError>
where
    T: Send,
    F: Fn(&mut T) + Send + Sync,
{
    ParallelDispatcher::new()
        .with_minimum_actions_per_thread(minimum_actions_per_thread)
        .for_each(buffer, action)
}

/// Fallible counterpart of [`for_each`].
pub fn try_for_each<T, E, F>(
    buffer: &mut [T],
    action: F,
    minimum_actions_per_thread: usize,
) -> Result<(), DispatchError<E>>
where
    T: Send,
    E: Send,
    F: Fn(&mut T) -> Result<(), E> + Send + Sync,
{
    ParallelDispatcher::new()
        .with_minimum_actions_per_thread(minimum_actions_per_thread)
        .try_for_each(buffer, action)
}

/// Apply `action` to every index of `range` on the global pool.
pub fn for_range<F>(
    range: Range<usize>,
    action: F,
    minimum_actions_per_thread: usize,
) -> Result<(), DispatchError>
where
    F: Fn(usize) + Send + Sync,
{
    ParallelDispatcher::new()
        .with_minimum_actions_per_thread(minimum_actions_per_thread)
        .for_range(range, action)
}
