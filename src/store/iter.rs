//! store/iter — key-order iteration.
//!
//! The iterator owns the store lock for its whole lifetime and bumps the
//! in-iteration counter, which makes the structural mutations (insert,
//! delete, truncate, open) fail with `WrongState` until it is dropped.
//! `find_value` and the update forms stay available — typically fed the
//! yielded offset as a hint — because they do not change the key set.
//!
//! A relocating update performed during iteration may leave offsets that
//! were already yielded stale; a stale hint is caught by the tag/key
//! verification and reported as `DataChanged`.

use parking_lot::ReentrantMutexGuard;
use std::ops::Bound;

use crate::codec::Storable;

use super::core::{KvStore, Shared};

/// Iterator over `(key, block offset)` pairs in ascending key order.
///
/// Yields copies; the per-step cursor is the last yielded key, so pairs
/// inserted behind the cursor by other operations are not revisited.
pub struct Iter<'a, K> {
    guard: ReentrantMutexGuard<'a, Shared<K>>,
    last: Option<K>,
}

impl<K: Storable + Ord + Clone, V: Storable> KvStore<K, V> {
    /// Iterate the key index in ascending key order. See the module notes
    /// for what is and is not allowed while the iterator is alive.
    pub fn iter(&self) -> Iter<'_, K> {
        let guard = self.shared.lock();
        guard.in_iteration.set(guard.in_iteration.get() + 1);
        Iter { guard, last: None }
    }
}

impl<K: Ord + Clone> Iterator for Iter<'_, K> {
    type Item = (K, u32);

    fn next(&mut self) -> Option<(K, u32)> {
        let inner = self.guard.inner.try_borrow().ok()?;
        let next = match &self.last {
            None => inner.index.iter().next(),
            Some(k) => inner
                .index
                .range((Bound::Excluded(k), Bound::Unbounded))
                .next(),
        }
        .map(|(k, off)| (k.clone(), *off));
        drop(inner);

        if let Some((k, _)) = &next {
            self.last = Some(k.clone());
        }
        next
    }
}

impl<K> Drop for Iter<'_, K> {
    fn drop(&mut self) {
        let n = self.guard.in_iteration.get();
        self.guard.in_iteration.set(n.saturating_sub(1));
    }
}
