use std::ops::Range;

use crate::error::InvalidMinimum;

/// Deterministic split of `[0, len)` into contiguous batches.
///
/// `num_batches = min(ceil(len / minimum), parallelism)` and
/// `batch_size = ceil(len / num_batches)`. When rounding leaves nothing for
/// the trailing batches their ranges are empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    len: usize,
    num_batches: usize,
    batch_size: usize,
}

impl BatchPlan {
    pub fn new(
        len: usize,
        minimum_actions_per_thread: usize,
        parallelism: usize,
    ) -> Result<Self, InvalidMinimum> {
        if minimum_actions_per_thread == 0 {
            return Err(InvalidMinimum(minimum_actions_per_thread));
        }
        let max_batches = len.div_ceil(minimum_actions_per_thread);
        let num_batches = max_batches.min(parallelism.max(1));
        let batch_size = if num_batches == 0 {
            0
        } else {
            len.div_ceil(num_batches)
        };
        Ok(Self {
            len,
            num_batches,
            batch_size,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether the work runs as one batch on the calling thread.
    pub fn is_sequential(&self) -> bool {
        self.num_batches == 1
    }

    /// Half-open index range of batch `index`.
    pub fn batch(&self, index: usize) -> Range<usize> {
        let start = index.saturating_mul(self.batch_size).min(self.len);
        let end = index
            .saturating_add(1)
            .saturating_mul(self.batch_size)
            .min(self.len);
        start..end
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.num_batches).map(move |index| self.batch(index))
    }
}
