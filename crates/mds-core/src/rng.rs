//! Random segment selection.
//!
//! The inbox picks a random candidate segment after a failed attempt. The
//! source of that randomness is injected so tests can script the choice.

use rand::Rng;

/// Source of uniformly distributed indices.
pub trait RandomSource: Send + Sync {
    /// Returns an index in `0..upper`. Returns `0` when `upper` is `0` or `1`.
    fn next_index(&self, upper: usize) -> usize;
}

/// Production source backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_index(&self, upper: usize) -> usize {
        if upper <= 1 {
            return 0;
        }
        rand::rng().random_range(0..upper)
    }
}
