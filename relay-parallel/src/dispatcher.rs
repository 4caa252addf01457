use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{BatchFault, DispatchError, PoolError};
use crate::limits::{Limit, ParallelOptions};
use crate::plan::BatchPlan;

/// Runs per-item actions over buffers in contiguous batches.
///
/// Inputs that fit a single batch run on the calling thread in index order.
/// Larger inputs are split by [`BatchPlan`] and the batches run concurrently,
/// each visiting its items in ascending order. Every call blocks until all
/// batches are done.
#[derive(Clone)]
pub struct ParallelDispatcher {
    pool: Option<Arc<ThreadPool>>,
    parallelism: usize,
    minimum_actions_per_thread: usize,
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        Self {
            pool: None,
            parallelism: rayon::current_num_threads(),
            minimum_actions_per_thread: 1,
        }
    }
}

impl std::fmt::Debug for ParallelDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelDispatcher")
            .field("dedicated_pool", &self.pool.is_some())
            .field("parallelism", &self.parallelism)
            .field("minimum_actions_per_thread", &self.minimum_actions_per_thread)
            .finish()
    }
}

impl ParallelDispatcher {
    /// Dispatcher on the global rayon pool using the host's parallelism.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: Limit) -> Result<Self, PoolError> {
        let dispatcher = match limit {
            Limit::Default => Self::default(),
            Limit::None => Self {
                parallelism: usize::MAX,
                ..Self::default()
            },
            Limit::Max(threads) => {
                let threads = threads.get();
                let pool = ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|index| format!("relay-worker-{index}"))
                    .build()
                    .map_err(|source| PoolError { threads, source })?;
                tracing::debug!(target: "relay-parallel::Dispatch", "started dedicated pool with {} threads", threads);
                Self {
                    pool: Some(Arc::new(pool)),
                    parallelism: threads,
                    minimum_actions_per_thread: 1,
                }
            }
        };
        Ok(dispatcher)
    }

    pub fn from_options(options: &ParallelOptions) -> Result<Self, PoolError> {
        Ok(Self::with_limit(options.limit())?
            .with_minimum_actions_per_thread(options.minimum_actions_per_thread))
    }

    /// Copy of this dispatcher using a different batch granularity. Zero is
    /// accepted here and rejected by every dispatch call.
    pub fn with_minimum_actions_per_thread(mut self, minimum: usize) -> Self {
        self.minimum_actions_per_thread = minimum;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn minimum_actions_per_thread(&self) -> usize {
        self.minimum_actions_per_thread
    }

    /// The batches a buffer of `len` items would be split into.
    pub fn plan(&self, len: usize) -> Result<BatchPlan, DispatchError> {
        Ok(BatchPlan::new(
            len,
            self.minimum_actions_per_thread,
            self.parallelism,
        )?)
    }

    /// Apply `action` to every item of `buffer`.
    ///
    /// A panicking action is re-raised on the caller once the other batches
    /// have finished; items already visited keep their new state.
    pub fn for_each<T, F>(&self, buffer: &mut [T], action: F) -> Result<(), DispatchError>
    where
        T: Send,
        F: Fn(&mut T) + Send + Sync,
    {
        let plan = self.plan(buffer.len())?;
        if plan.is_empty() {
            return Ok(());
        }
        if plan.is_sequential() {
            buffer.iter_mut().for_each(&action);
            return Ok(());
        }

        tracing::trace!(target: "relay-parallel::Dispatch", "for_each: {} items in {} batches of {}", plan.len(), plan.num_batches(), plan.batch_size());
        self.install(|| {
            buffer
                .par_chunks_mut(plan.batch_size())
                .for_each(|batch| batch.iter_mut().for_each(&action));
        });
        Ok(())
    }

    /// Apply a fallible `action` to every item of `buffer`.
    ///
    /// A batch stops at its first failing item; the other batches still run
    /// to completion. There is no rollback of items already processed.
    pub fn try_for_each<T, E, F>(&self, buffer: &mut [T], action: F) -> Result<(), DispatchError<E>>
    where
        T: Send,
        E: Send,
        F: Fn(&mut T) -> Result<(), E> + Send + Sync,
    {
        let plan = BatchPlan::new(
            buffer.len(),
            self.minimum_actions_per_thread,
            self.parallelism,
        )?;
        if plan.is_empty() {
            return Ok(());
        }

        let failures: Vec<BatchFault<E>> = if plan.is_sequential() {
            run_batch(0, 0, buffer, &action).into_iter().collect()
        } else {
            let batch_size = plan.batch_size();
            self.install(|| {
                buffer
                    .par_chunks_mut(batch_size)
                    .enumerate()
                    .filter_map(|(batch, items)| {
                        run_batch(batch, batch * batch_size, items, &action)
                    })
                    .collect()
            })
        };

        if failures.is_empty() {
            return Ok(());
        }
        tracing::debug!(target: "relay-parallel::Dispatch", "try_for_each: {} of {} batches failed", failures.len(), plan.num_batches());
        Err(DispatchError::Batches {
            batches: plan.num_batches(),
            failures,
        })
    }

    /// Apply `action` to every index in `range`.
    pub fn for_range<F>(&self, range: Range<usize>, action: F) -> Result<(), DispatchError>
    where
        F: Fn(usize) + Send + Sync,
    {
        let start = range.start;
        let plan = self.plan(range.len())?;
        if plan.is_empty() {
            return Ok(());
        }
        if plan.is_sequential() {
            range.for_each(&action);
            return Ok(());
        }

        tracing::trace!(target: "relay-parallel::Dispatch", "for_range: {} indices in {} batches of {}", plan.len(), plan.num_batches(), plan.batch_size());
        self.install(|| {
            (0..plan.num_batches()).into_par_iter().for_each(|batch| {
                for offset in plan.batch(batch) {
                    action(start + offset);
                }
            });
        });
        Ok(())
    }

    fn install<R, OP>(&self, op: OP) -> R
    where
        R: Send,
        OP: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

fn run_batch<T, E, F>(batch: usize, offset: usize, items: &mut [T], action: &F) -> Option<BatchFault<E>>
where
    F: Fn(&mut T) -> Result<(), E>,
{
    let range = offset..offset + items.len();
    for (position, item) in items.iter_mut().enumerate() {
        if let Err(error) = action(item) {
            return Some(BatchFault {
                batch,
                range,
                index: offset + position,
                error,
            });
        }
    }
    None
}
