//! store/core — the store object, its lock and its shared state.
//!
//! One recursive mutex per instance guards everything: the data file
//! handle, the key index, the free-block registry, the sticky error flags
//! and the in-iteration counter. Reentrancy lets compound operations
//! (upsert → update → insert) and the manual `lock()` guard compose
//! without self-deadlock. The mutable state sits in a `RefCell` behind
//! the mutex; a caller-supplied callback that re-enters the store is
//! detected through `try_borrow_mut` and rejected instead of deadlocking
//! or aborting.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs::File;
use std::marker::PhantomData;
use std::path::PathBuf;

use crate::codec::Storable;
use crate::config::StoreConfig;
use crate::errors::{self, Result, StoreError, FLAG_WRONG_STATE};
use crate::free::FreeRegistry;

/// Persistent key-value pairs: every key plus a 4-byte block offset stays
/// in memory, values live in a single block-structured data file.
///
/// An instance starts unbound; [`open`](KvStore::open) binds a data file
/// and rebuilds the in-memory structures from it. All operations are
/// thread-safe; see [`lock`](KvStore::lock) for composing several of them
/// atomically.
pub struct KvStore<K, V> {
    pub(crate) shared: ReentrantMutex<Shared<K>>,
    _value: PhantomData<fn() -> V>,
}

/// State reachable while the mutex is held. The error flags and the
/// iteration counter live outside the `RefCell` so they stay accessible
/// while an operation holds the inner borrow.
pub(crate) struct Shared<K> {
    pub(crate) flags: Cell<u8>,
    pub(crate) in_iteration: Cell<u32>,
    pub(crate) inner: RefCell<Inner<K>>,
}

pub(crate) struct Inner<K> {
    /// `None` either because the store was never opened (`path` is also
    /// `None`) or because the fatal path closed the file after a failed
    /// rollback (`path` stays `Some`).
    pub(crate) file: Option<File>,
    pub(crate) path: Option<PathBuf>,
    pub(crate) file_size: u64,
    pub(crate) index: BTreeMap<K, u32>,
    pub(crate) free: FreeRegistry,
    pub(crate) cfg: StoreConfig,
}

impl<K> Inner<K> {
    pub(crate) fn file_mut(&mut self) -> Result<&mut File> {
        match self.file.as_mut() {
            Some(f) => Ok(f),
            None if self.path.is_some() => Err(errors::store_closed()),
            None => Err(StoreError::WrongState("store is not open")),
        }
    }

    /// The fatal path: memory and disk are no longer proven coherent, so
    /// the file is dropped. Everything except `open` fails with `Io` from
    /// here on.
    pub(crate) fn fatal_close(&mut self) {
        log::error!("rollback failed; closing the data file, re-open to recover");
        self.file = None;
    }
}

impl<K, V> KvStore<K, V> {
    /// A new, unbound store with configuration taken from the environment.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::from_env())
    }

    /// A new, unbound store with explicit configuration.
    pub fn with_config(cfg: StoreConfig) -> Self {
        Self {
            shared: ReentrantMutex::new(Shared {
                flags: Cell::new(0),
                in_iteration: Cell::new(0),
                inner: RefCell::new(Inner {
                    file: None,
                    path: None,
                    file_size: 0,
                    index: BTreeMap::new(),
                    free: FreeRegistry::new(),
                    cfg,
                }),
            }),
            _value: PhantomData,
        }
    }

    /// Run `f` with the lock held and the inner state borrowed, recording
    /// any returned error into the sticky flag bitset.
    pub(crate) fn with_inner<T>(
        &self,
        f: impl FnOnce(&Shared<K>, &mut Inner<K>) -> Result<T>,
    ) -> Result<T> {
        let shared = self.shared.lock();
        let mut inner = match shared.inner.try_borrow_mut() {
            Ok(i) => i,
            Err(_) => {
                shared.flags.set(shared.flags.get() | FLAG_WRONG_STATE);
                return Err(StoreError::WrongState("store re-entered from a callback"));
            }
        };
        let res = f(&shared, &mut inner);
        if let Err(e) = &res {
            shared.flags.set(shared.flags.get() | e.flag());
        }
        res
    }
}

impl<K, V> Default for KvStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Storable + Ord + Clone, V: Storable> KvStore<K, V> {
    /// Number of key-value pairs (entries in the in-memory key index).
    pub fn size(&self) -> usize {
        self.with_inner(|_, inner| Ok(inner.index.len())).unwrap_or(0)
    }

    /// Current size of the data file as tracked by the store.
    pub fn file_size(&self) -> u64 {
        self.with_inner(|_, inner| Ok(inner.file_size)).unwrap_or(0)
    }

    /// Smallest key and its block offset, `None` when the store is empty.
    pub fn first_element(&self) -> Option<(K, u32)> {
        self.with_inner(|_, inner| {
            Ok(inner.index.iter().next().map(|(k, off)| (k.clone(), *off)))
        })
        .unwrap_or(None)
    }

    /// Largest key and its block offset, `None` when the store is empty.
    pub fn last_element(&self) -> Option<(K, u32)> {
        self.with_inner(|_, inner| {
            Ok(inner.index.iter().next_back().map(|(k, off)| (k.clone(), *off)))
        })
        .unwrap_or(None)
    }

    /// Union of the flag bits of every error returned since the last
    /// [`clear_error_flags`](KvStore::clear_error_flags). See the `FLAG_*`
    /// constants in [`crate::errors`].
    pub fn error_flags(&self) -> u8 {
        self.shared.lock().flags.get()
    }

    pub fn clear_error_flags(&self) {
        self.shared.lock().flags.set(0);
    }

    /// Hold the store lock across several operations. The lock is
    /// recursive, so the operations themselves still work while the guard
    /// is alive; dropping the guard releases it.
    pub fn lock(&self) -> StoreGuard<'_, K> {
        StoreGuard {
            _guard: self.shared.lock(),
        }
    }

    /// Snapshot of the free-block registry as `(offset, size)` pairs.
    pub fn free_blocks(&self) -> Vec<(u32, i16)> {
        self.with_inner(|_, inner| {
            Ok(inner.free.entries().iter().map(|f| (f.offset, f.size)).collect())
        })
        .unwrap_or_default()
    }
}

/// RAII handle returned by [`KvStore::lock`]; keeps the store lock held
/// until dropped.
pub struct StoreGuard<'a, K> {
    _guard: ReentrantMutexGuard<'a, Shared<K>>,
}
