//! Error taxonomy and the sticky error-flag bitset.
//!
//! Every public operation returns `Result<T, StoreError>`. In addition, each
//! store instance OR-accumulates the flag bit of every error it returns into
//! a sticky bitset, so a caller may run a batch of operations and inspect
//! the union of failures once (`error_flags` / `clear_error_flags`).

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Out of memory, or a computed block size outside 3..=32 767 bytes,
    /// or a value that cannot be encoded (e.g. a string with interior NUL).
    #[error("allocation failed or block size limit exceeded")]
    Alloc,

    /// The requested key is not present in the key index.
    #[error("key not found")]
    NotFound,

    /// Insert of a key that is already present.
    #[error("key already exists")]
    NotUnique,

    /// The on-disk tag or key at the indexed offset does not match the
    /// in-memory index; the file was corrupted or modified externally.
    #[error("on-disk data does not match the in-memory index")]
    DataChanged,

    /// A file seek, read or write failed.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation is not allowed in the current state (open while open,
    /// structural mutation while iterating, use of an unopened store, ...).
    #[error("operation not allowed: {0}")]
    WrongState(&'static str),
}

// Flag bits of the sticky error bitset, one per error kind.
pub const FLAG_ALLOC: u8 = 0x01;
pub const FLAG_NOT_FOUND: u8 = 0x02;
pub const FLAG_NOT_UNIQUE: u8 = 0x04;
pub const FLAG_DATA_CHANGED: u8 = 0x08;
pub const FLAG_IO: u8 = 0x10;
pub const FLAG_WRONG_STATE: u8 = 0x20;

impl StoreError {
    /// The sticky-bitset bit for this error kind.
    pub fn flag(&self) -> u8 {
        match self {
            StoreError::Alloc => FLAG_ALLOC,
            StoreError::NotFound => FLAG_NOT_FOUND,
            StoreError::NotUnique => FLAG_NOT_UNIQUE,
            StoreError::DataChanged => FLAG_DATA_CHANGED,
            StoreError::Io(_) => FLAG_IO,
            StoreError::WrongState(_) => FLAG_WRONG_STATE,
        }
    }
}

/// An `Io` error for operations attempted after the fatal path closed the
/// data file (failed rollback left memory and disk incoherent).
pub(crate) fn store_closed() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "data file closed after a failed rollback; re-open to recover",
    ))
}
