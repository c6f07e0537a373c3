//! Bitset over output columns tracking which of them still need rendering work.

/// Set of dirty output columns.
///
/// A column is dirty while any of its pixels has not resolved to real data. The set supports an
/// atomic snapshot-and-clear so that completions landing while a pass scans the snapshot
/// populate a fresh set instead of being lost.
pub(crate) struct DirtyColumns {
    words: Vec<u64>,
    columns: u32,
}

impl DirtyColumns {
    pub(crate) fn new(columns: u32) -> Self {
        Self {
            words: vec![0; (columns as usize).div_ceil(64)],
            columns,
        }
    }

    pub(crate) fn mark(&mut self, col: u32) {
        if col < self.columns {
            self.words[(col / 64) as usize] |= 1 << (col % 64);
        }
    }

    /// Marks all columns of the inclusive range, clamped to the set's width.
    pub(crate) fn mark_range(&mut self, min: u32, max: u32) {
        for col in min..=max.min(self.columns.saturating_sub(1)) {
            self.mark(col);
        }
    }

    pub(crate) fn mark_all(&mut self) {
        for word in &mut self.words {
            *word = u64::MAX;
        }
        self.trim();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub(crate) fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Takes the current set, leaving an empty one of the same width behind.
    pub(crate) fn take(&mut self) -> ColumnSnapshot {
        let words = std::mem::replace(&mut self.words, vec![0; (self.columns as usize).div_ceil(64)]);
        ColumnSnapshot { words }
    }

    /// Clears bits beyond the column count.
    fn trim(&mut self) {
        let tail = self.columns % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

/// An immutable snapshot of dirty columns taken by [`DirtyColumns::take`].
pub(crate) struct ColumnSnapshot {
    words: Vec<u64>,
}

impl ColumnSnapshot {
    pub(crate) fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            (0..64).filter_map(move |bit| {
                if word & (1 << bit) != 0 {
                    Some((index * 64 + bit) as u32)
                } else {
                    None
                }
            })
        })
    }
}
