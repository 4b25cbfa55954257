//! Block codec: sizing, image construction and raw file access.
//!
//! A block is `[tag: i16 LE][key][value][unspecified tail]`, `|tag|` bytes
//! in total. Positive tag: in use; negative: free; zero: illegal. Readers
//! here pull one whole block payload into memory first so the typed
//! decoders in [`crate::codec`] never cross a block boundary.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::codec::Storable;
use crate::consts::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, TAG_SIZE};
use crate::errors::{Result, StoreError};

/// True when both the key and the value encodings have a fixed width,
/// in which case blocks are allocated without slack.
pub fn is_fixed_width<K: Storable, V: Storable>() -> bool {
    K::fixed_width().is_some() && V::fixed_width().is_some()
}

/// Bytes actually needed for one pair: tag + encoded key + encoded value.
pub fn data_size<K: Storable, V: Storable>(key: &K, value: &V) -> usize {
    TAG_SIZE + key.encoded_len() + value.encoded_len()
}

/// Capacity of a freshly allocated block for `data` bytes of pair data:
/// exactly `data` for fixed-width pairs, `ceil(data * (1 + slack))` capped
/// at the block-size limit otherwise. Fails with `Alloc` when the data
/// alone does not fit a block.
pub fn block_capacity<K: Storable, V: Storable>(data: usize, slack: f64) -> Result<usize> {
    if data > MAX_BLOCK_SIZE {
        return Err(StoreError::Alloc);
    }
    if is_fixed_width::<K, V>() {
        return Ok(data);
    }
    let grown = ((data as f64) * (1.0 + slack)).ceil() as usize;
    Ok(grown.min(MAX_BLOCK_SIZE))
}

/// Build the on-disk image of an in-use block of `block_size` bytes.
/// The tail past the encoded pair is zero-filled (its content is
/// unspecified by the format).
pub fn build_image<K: Storable, V: Storable>(block_size: usize, key: &K, value: &V) -> Vec<u8> {
    debug_assert!((MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size));
    let mut buf = Vec::with_capacity(block_size);
    let mut tag = [0u8; TAG_SIZE];
    LittleEndian::write_i16(&mut tag, block_size as i16);
    buf.extend_from_slice(&tag);
    key.write_to(&mut buf);
    value.write_to(&mut buf);
    debug_assert!(buf.len() <= block_size);
    buf.resize(block_size, 0);
    buf
}

fn corrupt(msg: &'static str) -> StoreError {
    StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

/// Validate a tag read at `off` against the file geometry and return the
/// total block size it denotes.
pub fn checked_block_size(tag: i16, off: u64, file_size: u64) -> Result<usize> {
    if tag == 0 {
        return Err(corrupt("zero block tag"));
    }
    let size = tag.unsigned_abs() as usize;
    if size < MIN_BLOCK_SIZE {
        return Err(corrupt("block smaller than the format minimum"));
    }
    if size > MAX_BLOCK_SIZE {
        // only i16::MIN, whose magnitude does not fit the positive range
        return Err(corrupt("block larger than the format maximum"));
    }
    if off + size as u64 > file_size {
        return Err(corrupt("block extends past end of file"));
    }
    Ok(size)
}

// ---------------- raw file access ----------------

pub fn read_tag(file: &mut File, off: u32) -> Result<i16> {
    file.seek(SeekFrom::Start(off as u64))?;
    Ok(file.read_i16::<LittleEndian>()?)
}

pub fn write_tag(file: &mut File, off: u32, tag: i16) -> Result<()> {
    file.seek(SeekFrom::Start(off as u64))?;
    file.write_i16::<LittleEndian>(tag)?;
    Ok(())
}

/// Read the `block_size - TAG_SIZE` payload bytes following the tag.
pub fn read_payload(file: &mut File, off: u32, block_size: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(off as u64 + TAG_SIZE as u64))?;
    let mut buf = vec![0u8; block_size - TAG_SIZE];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_at(file: &mut File, off: u64, bytes: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(off))?;
    file.write_all(bytes)?;
    Ok(())
}
