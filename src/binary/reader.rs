//! Database decoder.
//!
//! Turns an untrusted byte buffer into a validated [`Snapshot`]. Every
//! offset is bounds-checked before use; a buffer that violates any declared
//! bound is rejected with [`Error::Format`].

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::format::*;
use crate::snapshot::{Buffers, Snapshot};
use crate::{Error, Result};

/// Decode an owned buffer.
pub fn decode(data: Vec<u8>, version: impl Into<String>) -> Result<Snapshot> {
    decode_with(Buffers::from_bytes(data), version)
}

/// Read a file into recycled buffers and decode it.
///
/// The pool keeps its previous allocation when it is large enough.
pub fn decode_file(
    path: &Path,
    mut buffers: Buffers,
    version: impl Into<String>,
) -> Result<Snapshot> {
    let pool = buffers.pool_mut();
    pool.clear();
    File::open(path)?.read_to_end(pool)?;
    decode_with(buffers, version)
}

/// Decode the bytes already held in `buffers.pool`, rebuilding the range
/// table in place.
pub fn decode_with(buffers: Buffers, version: impl Into<String>) -> Result<Snapshot> {
    let Buffers { pool, mut ranges } = buffers;

    let count = read_u32_le(&pool, 0)
        .ok_or_else(|| truncated("record count", COUNT_SIZE, pool.len()))? as usize;

    let ranges_end = table_end(count)
        .ok_or_else(|| Error::Format(format!("record count {} overflows", count)))?;
    if pool.len() < ranges_end {
        return Err(truncated("range table", ranges_end, pool.len()));
    }

    let (prefix_start, prefix_end) = decode_prefixes(&pool, count)?;

    ranges.clear();
    ranges.reserve(count);
    let mut prev_end = 0u32;
    for (i, chunk) in pool[RANGES_OFFSET..ranges_end]
        .chunks_exact(RANGE_ENTRY_SIZE)
        .enumerate()
    {
        let bytes: &[u8; RANGE_ENTRY_SIZE] = chunk
            .try_into()
            .map_err(|_| Error::Format(format!("range {} is short", i)))?;
        let entry = RangeEntry::from_bytes(bytes);

        if entry.span().end > pool.len() {
            return Err(Error::Format(format!(
                "range {} record {}..{} exceeds buffer length {}",
                i,
                entry.span().start,
                entry.span().end,
                pool.len()
            )));
        }
        if entry.end_ip < prev_end {
            return Err(Error::Format(format!(
                "range {} end {} is below previous end {}",
                i, entry.end_ip, prev_end
            )));
        }
        prev_end = entry.end_ip;
        ranges.push(entry);
    }

    let digest = format!("{:x}", Sha256::digest(&pool));

    Ok(Snapshot {
        prefix_start,
        prefix_end,
        ranges,
        pool,
        version: version.into(),
        digest,
    })
}

type Prefixes = ([u32; PREFIX_COUNT], [u32; PREFIX_COUNT]);

fn decode_prefixes(data: &[u8], count: usize) -> Result<Prefixes> {
    let mut start = [0u32; PREFIX_COUNT];
    let mut end = [0u32; PREFIX_COUNT];
    // An empty table only admits empty buckets at index 0.
    let max_index = count.saturating_sub(1);

    for k in 0..PREFIX_COUNT {
        let pos = COUNT_SIZE + k * PREFIX_ENTRY_SIZE;
        let s = read_u32_le(data, pos)
            .ok_or_else(|| truncated("prefix table", pos + 4, data.len()))?;
        let e = read_u32_le(data, pos + 4)
            .ok_or_else(|| truncated("prefix table", pos + 8, data.len()))?;
        if s > e {
            return Err(Error::Format(format!(
                "prefix {} start {} is after end {}",
                k, s, e
            )));
        }
        if e as usize > max_index {
            return Err(Error::Format(format!(
                "prefix {} end {} out of range for {} records",
                k, e, count
            )));
        }
        start[k] = s;
        end[k] = e;
    }

    Ok((start, end))
}

fn truncated(what: &str, need: usize, have: usize) -> Error {
    Error::Format(format!(
        "buffer too short for {}: need {} bytes, have {}",
        what, need, have
    ))
}
