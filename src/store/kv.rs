//! store/kv — insert / find / update / upsert / delete.
//!
//! Write paths follow a fixed discipline: place the block (best-fit over
//! the free registry, else append), update the index, write the image,
//! and on a failed write roll the on-disk tag back to "free". A rollback
//! that itself fails takes the fatal path (the file is closed; see
//! `store/core`).

use std::ops::{Add, Div, Mul, Sub};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use crate::block;
use crate::codec::Storable;
use crate::consts::{MAX_FILE_SIZE, TAG_SIZE};
use crate::errors::{Result, StoreError, FLAG_IO};

use super::core::{Inner, KvStore};

// ----------------- public operations -----------------

impl<K: Storable + Ord + Clone, V: Storable> KvStore<K, V> {
    /// Insert a new pair. Fails with `NotUnique` when the key is already
    /// present and with `WrongState` while an iterator is live.
    pub fn insert(&self, key: &K, value: &V) -> Result<()> {
        self.with_inner(|shared, inner| {
            if shared.in_iteration.get() > 0 {
                return Err(StoreError::WrongState("cannot insert while iterating"));
            }
            inner.insert_pair(key, value)
        })
    }

    /// Block offset of `key` from the in-memory index; no disk access.
    pub fn find_block_offset(&self, key: &K) -> Result<u32> {
        self.with_inner(|_, inner| inner.lookup(key))
    }

    /// Read the value of `key` from the data file. `hint` skips the index
    /// lookup (useful during iteration); the stored key is verified
    /// against `key` either way and a mismatch reports `DataChanged`.
    pub fn find_value(&self, key: &K, hint: Option<u32>) -> Result<V> {
        self.with_inner(|_, inner| inner.find_value(key, hint))
    }

    /// Replace the value of `key`. Fits-in-place updates keep the block;
    /// larger values relocate to a best-fit or appended block and free the
    /// old one.
    pub fn update(&self, key: &K, new_value: &V, hint: Option<u32>) -> Result<()> {
        self.with_inner(|_, inner| inner.update_pair(key, new_value, hint))
    }

    /// Read-modify-write under the store lock: read the value, apply `f`,
    /// write the result back. The whole sequence is atomic with respect to
    /// other threads. `f` must not call back into this store; a panicking
    /// `f` is treated like an unrecoverable write failure (fatal path)
    /// before the panic is propagated.
    pub fn update_with<F>(&self, key: &K, f: F, hint: Option<u32>) -> Result<()>
    where
        F: FnOnce(&mut V),
    {
        self.with_inner(|shared, inner| {
            let mut value: V = inner.find_value(key, hint)?;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(&mut value))) {
                inner.fatal_close();
                shared.flags.set(shared.flags.get() | FLAG_IO);
                resume_unwind(payload);
            }
            inner.update_pair(key, &value, hint)
        })
    }

    /// Update `key`, or insert it when absent.
    pub fn upsert(&self, key: &K, value: &V) -> Result<()> {
        self.with_inner(|shared, inner| match inner.update_pair(key, value, None) {
            Err(StoreError::NotFound) => {
                if shared.in_iteration.get() > 0 {
                    return Err(StoreError::WrongState("cannot insert while iterating"));
                }
                inner.insert_pair(key, value)
            }
            other => other,
        })
    }

    /// Read-modify-write `key` through `f`, or insert `default` when the
    /// key is absent. Same callback rules as [`update_with`](Self::update_with).
    pub fn upsert_with<F>(&self, key: &K, f: F, default: &V) -> Result<()>
    where
        F: FnOnce(&mut V),
    {
        self.with_inner(|shared, inner| match inner.find_value::<V>(key, None) {
            Ok(mut value) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(&mut value))) {
                    inner.fatal_close();
                    shared.flags.set(shared.flags.get() | FLAG_IO);
                    resume_unwind(payload);
                }
                inner.update_pair(key, &value, None)
            }
            Err(StoreError::NotFound) => {
                if shared.in_iteration.get() > 0 {
                    return Err(StoreError::WrongState("cannot insert while iterating"));
                }
                inner.insert_pair(key, default)
            }
            Err(e) => Err(e),
        })
    }

    /// Remove `key` and mark its block free. Fails with `WrongState` while
    /// an iterator is live.
    pub fn delete(&self, key: &K) -> Result<()> {
        self.with_inner(|shared, inner| {
            if shared.in_iteration.get() > 0 {
                return Err(StoreError::WrongState("cannot delete while iterating"));
            }
            inner.delete_pair(key)
        })
    }
}

// ----------------- arithmetic conveniences -----------------
//
// Each is one locked read-modify-write. Note that a transformation that
// panics (integer division by zero, overflow in debug builds) takes the
// fatal path like any other panicking callback.

impl<K: Storable + Ord + Clone, V: Storable + Clone> KvStore<K, V> {
    pub fn add(&self, key: &K, delta: V) -> Result<()>
    where
        V: Add<Output = V>,
    {
        self.update_with(key, |v| *v = v.clone() + delta, None)
    }

    pub fn sub(&self, key: &K, delta: V) -> Result<()>
    where
        V: Sub<Output = V>,
    {
        self.update_with(key, |v| *v = v.clone() - delta, None)
    }

    pub fn mul(&self, key: &K, factor: V) -> Result<()>
    where
        V: Mul<Output = V>,
    {
        self.update_with(key, |v| *v = v.clone() * factor, None)
    }

    pub fn div(&self, key: &K, divisor: V) -> Result<()>
    where
        V: Div<Output = V>,
    {
        self.update_with(key, |v| *v = v.clone() / divisor, None)
    }

    pub fn increment(&self, key: &K) -> Result<()>
    where
        V: Add<Output = V> + From<u8>,
    {
        self.add(key, V::from(1))
    }

    pub fn decrement(&self, key: &K) -> Result<()>
    where
        V: Sub<Output = V> + From<u8>,
    {
        self.sub(key, V::from(1))
    }
}

// ----------------- inner operations (lock already held) -----------------

impl<K: Storable + Ord + Clone> Inner<K> {
    pub(crate) fn lookup(&self, key: &K) -> Result<u32> {
        self.index.get(key).copied().ok_or(StoreError::NotFound)
    }

    fn ensure_open(&mut self) -> Result<()> {
        self.file_mut().map(|_| ())
    }

    /// Read the tag and payload of the in-use block at `off`.
    fn read_used_payload(&mut self, off: u32) -> Result<(usize, Vec<u8>)> {
        let file_size = self.file_size;
        let file = self.file_mut()?;
        let tag = block::read_tag(file, off)?;
        if tag <= 0 {
            return Err(StoreError::DataChanged);
        }
        let size = block::checked_block_size(tag, off as u64, file_size)?;
        let payload = block::read_payload(file, off, size)?;
        Ok((size, payload))
    }

    /// Pick the location for a new block of `data` bytes: the best-fit
    /// free block (adopted whole, its size becomes the block size), else
    /// the end of the file with slack capacity.
    /// Returns (offset, block size, free-registry entry to consume).
    fn place_block<V: Storable>(&self, data: usize) -> Result<(u32, usize, Option<usize>)> {
        let desired = block::block_capacity::<K, V>(data, self.cfg.slack_fraction)?;
        match self.free.best_fit(data) {
            Some(idx) => {
                let fb = self.free.entries()[idx];
                Ok((fb.offset, fb.size as usize, Some(idx)))
            }
            None => {
                if self.file_size + desired as u64 > MAX_FILE_SIZE {
                    return Err(StoreError::Alloc);
                }
                Ok((self.file_size as u32, desired, None))
            }
        }
    }

    /// Best-effort rollback after a failed block write: mark the block
    /// free on disk again. When even that fails, take the fatal path.
    fn rollback_tag(&mut self, off: u32, block_size: usize) {
        let res = match self.file.as_mut() {
            Some(file) => block::write_tag(file, off, -(block_size as i16)),
            None => Ok(()),
        };
        match res {
            Ok(()) => log::warn!("block write at offset {} rolled back", off),
            Err(_) => self.fatal_close(),
        }
    }

    pub(crate) fn insert_pair<V: Storable>(&mut self, key: &K, value: &V) -> Result<()> {
        self.ensure_open()?;
        if self.index.contains_key(key) {
            return Err(StoreError::NotUnique);
        }
        key.ensure_encodable()?;
        value.ensure_encodable()?;

        let data = block::data_size(key, value);
        let (off, block_size, reused) = self.place_block::<V>(data)?;

        self.index.insert(key.clone(), off);

        let image = block::build_image(block_size, key, value);
        let written = {
            let file = self.file_mut()?;
            block::write_at(file, off as u64, &image)
        };
        if let Err(e) = written {
            self.index.remove(key);
            self.rollback_tag(off, block_size);
            return Err(e);
        }

        match reused {
            Some(idx) => {
                self.free.remove(idx);
                log::debug!("insert reused free block at {} ({} bytes)", off, block_size);
            }
            None => {
                self.file_size += block_size as u64;
            }
        }
        Ok(())
    }

    pub(crate) fn find_value<V: Storable>(&mut self, key: &K, hint: Option<u32>) -> Result<V> {
        self.ensure_open()?;
        let off = match hint {
            Some(o) => o,
            None => self.lookup(key)?,
        };
        let (_, payload) = self.read_used_payload(off)?;
        let (stored_key, key_len) = K::read_from(&payload)?;
        if stored_key != *key {
            return Err(StoreError::DataChanged);
        }
        let (value, _) = V::read_from(&payload[key_len..])?;
        Ok(value)
    }

    pub(crate) fn update_pair<V: Storable>(
        &mut self,
        key: &K,
        new_value: &V,
        hint: Option<u32>,
    ) -> Result<()> {
        self.ensure_open()?;
        let off = match hint {
            Some(o) => o,
            None => self.lookup(key)?,
        };

        let (cur_size, payload) = self.read_used_payload(off)?;
        let (stored_key, key_len) = K::read_from(&payload)?;
        if stored_key != *key {
            return Err(StoreError::DataChanged);
        }

        new_value.ensure_encodable()?;
        let new_data = block::data_size(key, new_value);

        if new_data <= cur_size {
            // In place: only the value bytes change, the block keeps its
            // size and the leftover stays as slack.
            let mut value_bytes = Vec::with_capacity(new_value.encoded_len());
            new_value.write_to(&mut value_bytes);
            let value_off = off as u64 + TAG_SIZE as u64 + key_len as u64;
            let written = {
                let file = self.file_mut()?;
                block::write_at(file, value_off, &value_bytes)
            };
            if let Err(e) = written {
                // A half-written value cannot be rolled back.
                self.fatal_close();
                return Err(e);
            }
            return Ok(());
        }

        // Relocate: write the pair into a new block, then free the old one.
        let (new_off, new_size, reused) = self.place_block::<V>(new_data)?;
        let image = block::build_image(new_size, key, new_value);
        let written = {
            let file = self.file_mut()?;
            block::write_at(file, new_off as u64, &image)
        };
        if let Err(e) = written {
            self.rollback_tag(new_off, new_size);
            return Err(e);
        }

        match reused {
            Some(idx) => {
                self.free.remove(idx);
            }
            None => {
                self.file_size += new_size as u64;
            }
        }

        let freed = {
            let file = self.file_mut()?;
            block::write_tag(file, off, -(cur_size as i16))
        };
        if let Err(e) = freed {
            // The new block is live and the old one could not be freed:
            // the file now holds the key twice.
            self.fatal_close();
            return Err(e);
        }

        self.index.insert(key.clone(), new_off);
        self.free.push(off, cur_size as i16);
        log::debug!(
            "relocated block {} -> {} ({} -> {} bytes)",
            off,
            new_off,
            cur_size,
            new_size
        );
        Ok(())
    }

    pub(crate) fn delete_pair(&mut self, key: &K) -> Result<()> {
        self.ensure_open()?;
        let off = self.lookup(key)?;
        let file_size = self.file_size;

        let tag = {
            let file = self.file_mut()?;
            block::read_tag(file, off)?
        };
        if tag <= 0 {
            return Err(StoreError::DataChanged);
        }
        let size = block::checked_block_size(tag, off as u64, file_size)?;

        self.index.remove(key);

        let freed = {
            let file = self.file_mut()?;
            block::write_tag(file, off, -(size as i16))
        };
        if let Err(e) = freed {
            // Disk still says "in use"; putting the index entry back keeps
            // memory and disk coherent.
            self.index.insert(key.clone(), off);
            log::warn!("delete rolled back, block at {} left in use", off);
            return Err(e);
        }

        self.free.push(off, size as i16);
        Ok(())
    }
}
