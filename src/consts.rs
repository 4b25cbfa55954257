//! Format constants of the data file.

/// Size of the signed 16-bit block tag, in bytes.
pub const TAG_SIZE: usize = 2;

/// Smallest legal block: tag plus at least one data byte.
pub const MIN_BLOCK_SIZE: usize = 3;

/// Largest legal block. The tag is an i16, so |tag| tops out here.
pub const MAX_BLOCK_SIZE: usize = i16::MAX as usize; // 32 767

/// Block offsets are u32; the data file must not outgrow them.
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64;
