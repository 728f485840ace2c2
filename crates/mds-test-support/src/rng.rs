//! Test randomness: scripted `RandomSource` implementations for tests.

use std::sync::Mutex;

use mds_core::rng::RandomSource;

/// Always picks the first candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstIndexRng;

impl RandomSource for FirstIndexRng {
    fn next_index(&self, _upper: usize) -> usize {
        0
    }
}

/// Returns indices from a predetermined sequence, wrapped into range and
/// repeated once exhausted. Used to script which segment a randomised inbox
/// selection lands on.
#[derive(Debug)]
pub struct SequenceRng {
    values: Vec<usize>,
    index: Mutex<usize>,
}

impl SequenceRng {
    /// Create a new `SequenceRng` with the given values.
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty.
    #[must_use]
    pub fn new(values: Vec<usize>) -> Self {
        assert!(!values.is_empty(), "SequenceRng needs at least one value");
        Self {
            values,
            index: Mutex::new(0),
        }
    }
}

impl RandomSource for SequenceRng {
    fn next_index(&self, upper: usize) -> usize {
        let mut index = self.index.lock().unwrap();
        let val = self.values[*index % self.values.len()];
        *index += 1;
        if upper == 0 { 0 } else { val % upper }
    }
}
