use std::convert::Infallible;
use std::ops::Range;

use thiserror::Error;

/// `minimum_actions_per_thread` was zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("minimum actions per thread must be greater than zero, got {0}")]
pub struct InvalidMinimum(pub usize);

/// Errors returned by a dispatch call.
#[derive(Debug, Error)]
pub enum DispatchError<E = Infallible> {
    #[error(transparent)]
    InvalidArgument(#[from] InvalidMinimum),

    /// One or more batches stopped on a failing item. Failures are listed in
    /// batch order.
    #[error("{} of {batches} batches failed", .failures.len())]
    Batches {
        batches: usize,
        failures: Vec<BatchFault<E>>,
    },
}

/// The first failure of a single batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFault<E> {
    pub batch: usize,
    pub range: Range<usize>,
    /// Absolute index of the failing item.
    pub index: usize,
    pub error: E,
}

/// A dedicated worker pool could not be started.
#[derive(Debug, Error)]
#[error("failed to build a worker pool with {threads} threads")]
pub struct PoolError {
    pub threads: usize,
    #[source]
    pub source: rayon::ThreadPoolBuildError,
}
