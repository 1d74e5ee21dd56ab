use std::ops::RangeInclusive;

use alloy::primitives::BlockNumber;

/// Yields consecutive `low..=high` block ranges of at most `batch_size` blocks, oldest first.
#[derive(Debug, Clone)]
pub(crate) struct RangeIterator {
    next: BlockNumber,
    end: BlockNumber,
    batch_size: u64,
    exhausted: bool,
}

impl RangeIterator {
    /// Ranges covering `start..=end`. Empty when `start > end`.
    ///
    /// A `batch_size` of zero is treated as one.
    pub(crate) fn forward(start: BlockNumber, end: BlockNumber, batch_size: u64) -> Self {
        Self { next: start, end, batch_size: batch_size.max(1), exhausted: start > end }
    }
}

impl Iterator for RangeIterator {
    type Item = RangeInclusive<BlockNumber>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let low = self.next;
        let high = low.saturating_add(self.batch_size - 1).min(self.end);
        if high == self.end {
            self.exhausted = true;
        } else {
            self.next = high + 1;
        }

        Some(low..=high)
    }
}
