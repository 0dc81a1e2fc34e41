//! Deterministic sharding of the suite list across CI machines.
use std::ops::Range;

use crate::error::CoreError;

/// Select batch `current` (1-based) of `count` contiguous partitions.
///
/// Boundaries are `floor(len * (current - 1) / count)` and
/// `floor(len * current / count)`: every suite lands in exactly one batch
/// and batch sizes differ by at most one. For 9 suites in 3 batches,
/// batch 2 is indices `3..6`; for 10 suites the sizes are 3, 3, 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    count: usize,
    current: usize,
}

impl Batch {
    pub fn new(count: usize, current: usize) -> Result<Self, CoreError> {
        if count == 0 || current == 0 || current > count {
            return Err(CoreError::InvalidBatch { count, current });
        }
        Ok(Self { count, current })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Index range of this batch in a list of `len` suites.
    pub fn range(&self, len: usize) -> Range<usize> {
        let start = len * (self.current - 1) / self.count;
        let end = len * self.current / self.count;
        start..end
    }

    pub fn select<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items[self.range(items.len())].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_batch_of_nine() {
        let suites: Vec<usize> = (0..9).collect();
        let batch = Batch::new(3, 2).unwrap();
        assert_eq!(batch.select(&suites), vec![3, 4, 5]);
    }

    #[test]
    fn batches_cover_every_suite_exactly_once() {
        for len in 0..40 {
            for count in 1..8 {
                let items: Vec<usize> = (0..len).collect();
                let mut seen = Vec::new();
                let mut sizes = Vec::new();
                for current in 1..=count {
                    let part = Batch::new(count, current).unwrap().select(&items);
                    sizes.push(part.len());
                    seen.extend(part);
                }
                assert_eq!(seen, items, "len={len} count={count}");

                let min = sizes.iter().min().copied().unwrap_or(0);
                let max = sizes.iter().max().copied().unwrap_or(0);
                assert!(max - min <= 1, "len={len} count={count} sizes={sizes:?}");
            }
        }
    }

    #[test]
    fn last_batch_takes_the_remainder() {
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(Batch::new(3, 1).unwrap().select(&items), vec![0, 1, 2]);
        assert_eq!(Batch::new(3, 2).unwrap().select(&items), vec![3, 4, 5]);
        assert_eq!(Batch::new(3, 3).unwrap().select(&items), vec![6, 7, 8, 9]);
    }

    #[test]
    fn rejects_out_of_range_batches() {
        assert!(Batch::new(0, 0).is_err());
        assert!(Batch::new(3, 0).is_err());
        assert!(matches!(
            Batch::new(3, 4),
            Err(CoreError::InvalidBatch { count: 3, current: 4 })
        ));
    }
}
