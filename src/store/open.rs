//! store/open — binding a data file and rebuilding the in-memory state.
//!
//! `open` scans the file sequentially from offset 0: positive tags feed
//! the key index, negative tags feed the free-block registry, each block
//! advances the cursor by `|tag|`. A failed scan leaves the file bound
//! (for diagnostics) with both in-memory structures cleared.

use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::block;
use crate::codec::Storable;
use crate::consts::MAX_FILE_SIZE;
use crate::errors::{Result, StoreError};
use crate::free::FreeRegistry;

use super::core::KvStore;

impl<K: Storable + Ord + Clone, V: Storable> KvStore<K, V> {
    /// Bind `path` as the data file, creating it empty when absent, and
    /// rebuild the key index and the free-block registry from its blocks.
    ///
    /// Fails with `WrongState` when a file is already bound, when an
    /// iterator is live, or when another store instance holds the file.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.with_inner(|shared, inner| {
            if shared.in_iteration.get() > 0 {
                return Err(StoreError::WrongState("cannot open while iterating"));
            }
            if inner.file.is_some() {
                return Err(StoreError::WrongState("a data file is already open"));
            }

            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?;
            file.try_lock_exclusive().map_err(|_| {
                StoreError::WrongState("data file is locked by another store instance")
            })?;

            let file_size = file.metadata()?.len();
            if file_size > MAX_FILE_SIZE {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "data file larger than the 32-bit offset space",
                )));
            }

            let scanned = scan_blocks::<K>(&mut file, file_size);

            // Bind the file either way; a failed scan leaves it open for
            // diagnostics with the half-built structures discarded.
            inner.file = Some(file);
            inner.path = Some(path.to_path_buf());
            inner.file_size = file_size;
            match scanned {
                Ok((index, free)) => {
                    log::debug!(
                        "opened {}: {} bytes, {} pairs, {} free blocks",
                        path.display(),
                        file_size,
                        index.len(),
                        free.len()
                    );
                    inner.index = index;
                    inner.free = free;
                    Ok(())
                }
                Err(e) => {
                    log::warn!("open {}: block scan failed: {}", path.display(), e);
                    inner.index.clear();
                    inner.free.clear();
                    Err(e)
                }
            }
        })
    }

    /// Discard all pairs: truncate the data file to zero length and clear
    /// both in-memory structures. Fails with `WrongState` while iterating.
    pub fn truncate(&self) -> Result<()> {
        self.with_inner(|shared, inner| {
            if shared.in_iteration.get() > 0 {
                return Err(StoreError::WrongState("cannot truncate while iterating"));
            }
            let file = inner.file_mut()?;
            file.set_len(0)?;
            if let Err(e) = file.sync_all() {
                // The kernel may have dropped the truncation with the
                // metadata; memory can no longer trust the file.
                inner.fatal_close();
                return Err(e.into());
            }
            inner.file_size = 0;
            inner.index.clear();
            inner.free.clear();
            Ok(())
        })
    }
}

fn scan_blocks<K: Storable + Ord + Clone>(
    file: &mut File,
    file_size: u64,
) -> Result<(BTreeMap<K, u32>, FreeRegistry)> {
    let mut index = BTreeMap::new();
    let mut free = FreeRegistry::new();

    let mut off = 0u64;
    while off < file_size {
        let tag = block::read_tag(file, off as u32)?;
        let size = block::checked_block_size(tag, off, file_size)?;
        if tag > 0 {
            let payload = block::read_payload(file, off as u32, size)?;
            let (key, _) = K::read_from(&payload)?;
            if index.insert(key, off as u32).is_some() {
                return Err(StoreError::NotUnique);
            }
        } else {
            free.push(off as u32, size as i16);
        }
        off += size as u64;
    }

    Ok((index, free))
}
