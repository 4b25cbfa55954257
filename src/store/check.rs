//! store/check — on-disk structure verification.
//!
//! Walks the data file block by block and cross-checks every tag against
//! the key index and the free-block registry: the two must partition the
//! file exactly, every indexed offset must carry a positive tag with the
//! matching key, every registry entry a negative tag of the matching
//! size, and no offset may appear twice.

use std::collections::HashMap;

use crate::block;
use crate::codec::Storable;
use crate::errors::{Result, StoreError};

use super::core::{Inner, KvStore};

/// Summary returned by [`KvStore::check`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub used_blocks: usize,
    pub free_blocks: usize,
    pub bytes_scanned: u64,
}

impl<K: Storable + Ord + Clone, V: Storable> KvStore<K, V> {
    /// Verify that the data file and the in-memory structures agree.
    /// Returns `DataChanged` on any mismatch, `Io` on unreadable blocks.
    pub fn check(&self) -> Result<CheckReport> {
        self.with_inner(|_, inner| inner.check_structure())
    }
}

impl<K: Storable + Ord + Clone> Inner<K> {
    pub(crate) fn check_structure(&mut self) -> Result<CheckReport> {
        let file_size = self.file_size;

        let mut unmatched_free: HashMap<u32, i16> = self
            .free
            .entries()
            .iter()
            .map(|f| (f.offset, f.size))
            .collect();
        if unmatched_free.len() != self.free.len() {
            // duplicate offsets in the registry
            return Err(StoreError::DataChanged);
        }

        let mut report = CheckReport::default();
        let mut off = 0u64;
        while off < file_size {
            let tag = {
                let file = self.file_mut()?;
                block::read_tag(file, off as u32)?
            };
            let size = block::checked_block_size(tag, off, file_size)?;

            if tag > 0 {
                let payload = {
                    let file = self.file_mut()?;
                    block::read_payload(file, off as u32, size)?
                };
                let (key, _) = K::read_from(&payload)?;
                match self.index.get(&key) {
                    Some(&indexed) if indexed == off as u32 => report.used_blocks += 1,
                    _ => return Err(StoreError::DataChanged),
                }
            } else {
                match unmatched_free.remove(&(off as u32)) {
                    Some(s) if s as usize == size => report.free_blocks += 1,
                    _ => return Err(StoreError::DataChanged),
                }
            }

            off += size as u64;
        }

        if report.used_blocks != self.index.len() || !unmatched_free.is_empty() {
            return Err(StoreError::DataChanged);
        }
        report.bytes_scanned = off;
        Ok(report)
    }
}
