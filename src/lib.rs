#![allow(non_snake_case)]

//! FlintKV — persistent key-value pairs for flash-backed filesystems.
//!
//! The full key set plus a 4-byte block offset per key stay resident in
//! memory (an ordered map, O(log n) lookup); values live in a single data
//! file made of variable-length blocks. Each block starts with a signed
//! 16-bit little-endian tag: positive means in use, negative means free,
//! `|tag|` is the block size. Freed blocks are reused best-fit without
//! splitting or merging; variable-width blocks carry slack so values can
//! grow a little in place.
//!
//! All operations on one store go through one recursive lock, so any
//! number of threads can share an instance; `update_with` runs its
//! transformation inside the lock for lost-update-free counters.
//!
//! ```no_run
//! use FlintKV::KvStore;
//!
//! # fn main() -> FlintKV::Result<()> {
//! let store: KvStore<String, String> = KvStore::new();
//! store.open("/data/settings.db")?;
//! store.insert(&"SSID".to_string(), &"home-net".to_string())?;
//! let ssid = store.find_value(&"SSID".to_string(), None)?;
//! assert_eq!(ssid, "home-net");
//! for (key, off) in store.iter() {
//!     let value = store.find_value(&key, Some(off))?;
//!     println!("{key} = {value}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod codec;
pub mod config;
pub mod consts;
pub mod errors;
pub mod free;
pub mod store;

pub use codec::Storable;
pub use config::StoreConfig;
pub use errors::{Result, StoreError};
pub use store::{CheckReport, Iter, KvStore, StoreGuard};
