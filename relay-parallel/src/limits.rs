use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Upper bound on the number of batches dispatched concurrently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Limit {
    /// Batches are only bounded by `minimum_actions_per_thread`.
    None,

    /// At most this many batches, run on a dedicated pool of that size.
    Max(NonZeroUsize),

    /// The host's available parallelism.
    #[default]
    Default,
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZeroUsize::new(value).map(Limit::Max).unwrap_or(Limit::None)
    }
}

/// Deserializable dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelOptions {
    /// `None` uses the host's available parallelism; `0` removes the cap.
    pub max_parallelism: Option<usize>,
    pub minimum_actions_per_thread: usize,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            minimum_actions_per_thread: 1,
        }
    }
}

impl ParallelOptions {
    pub fn limit(&self) -> Limit {
        self.max_parallelism.map(Limit::from).unwrap_or_default()
    }
}
