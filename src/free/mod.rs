//! In-memory registry of free blocks.
//!
//! One entry per block whose on-disk tag is negative. The registry is an
//! unordered vector rebuilt on open; the data file itself is the durable
//! source of truth through the tag signs.
//!
//! Allocation is best-fit: the smallest free block that can hold the
//! requested data wins, and is adopted whole (no split; the surplus
//! becomes slack of the new in-use block). Adjacent free blocks are not
//! merged.

/// A reusable hole in the data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeBlock {
    /// Offset of the block start (the tag) in the data file.
    pub offset: u32,
    /// Total block size in bytes, tag included. Always positive; the
    /// on-disk tag of this block is `-size`.
    pub size: i16,
}

/// The free-block registry.
#[derive(Debug, Default)]
pub struct FreeRegistry {
    entries: Vec<FreeBlock>,
}

impl FreeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Record a freed block.
    pub fn push(&mut self, offset: u32, size: i16) {
        debug_assert!(size > 0);
        self.entries.push(FreeBlock { offset, size });
    }

    /// Remove the entry at `idx` (as returned by [`best_fit`]).
    ///
    /// [`best_fit`]: FreeRegistry::best_fit
    pub fn remove(&mut self, idx: usize) -> FreeBlock {
        self.entries.swap_remove(idx)
    }

    /// Index of the free block whose size is at least `data_size` and
    /// wastes the least space, or `None` when no block is large enough.
    /// Ties go to the first entry scanned.
    pub fn best_fit(&self, data_size: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None; // (idx, waste)
        for (i, fb) in self.entries.iter().enumerate() {
            let size = fb.size as usize;
            if size < data_size {
                continue;
            }
            let waste = size - data_size;
            match best {
                Some((_, w)) if w <= waste => {}
                _ => best = Some((i, waste)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Snapshot of all entries, in registry order.
    pub fn entries(&self) -> &[FreeBlock] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_fit_minimizes_waste() {
        let mut reg = FreeRegistry::new();
        reg.push(0, 100);
        reg.push(100, 40);
        reg.push(140, 60);

        let idx = reg.best_fit(50).unwrap();
        assert_eq!(reg.entries()[idx].size, 60);

        let idx = reg.best_fit(40).unwrap();
        assert_eq!(reg.entries()[idx].size, 40);
    }

    #[test]
    fn best_fit_none_when_all_too_small() {
        let mut reg = FreeRegistry::new();
        reg.push(0, 10);
        reg.push(10, 20);
        assert!(reg.best_fit(21).is_none());
    }

    #[test]
    fn best_fit_exact_match_wins() {
        let mut reg = FreeRegistry::new();
        reg.push(0, 64);
        reg.push(64, 32);
        let idx = reg.best_fit(32).unwrap();
        assert_eq!(reg.entries()[idx].offset, 64);
    }

    #[test]
    fn remove_returns_entry() {
        let mut reg = FreeRegistry::new();
        reg.push(0, 16);
        reg.push(16, 8);
        let idx = reg.best_fit(5).unwrap();
        let fb = reg.remove(idx);
        assert_eq!(fb, FreeBlock { offset: 16, size: 8 });
        assert_eq!(reg.len(), 1);
    }
}
