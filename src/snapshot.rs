//! Immutable decoded database and range-index search.

use std::net::Ipv4Addr;

use crate::binary::{RangeEntry, PREFIX_COUNT};
use crate::record::GeoRecord;
use crate::{Error, Result};

/// Backing storage of a snapshot, recyclable across refresh cycles.
///
/// The decoder fills `pool` with the raw file and rebuilds `ranges` in
/// place, so a displaced snapshot's allocations can seed the next decode.
#[derive(Debug, Default)]
pub struct Buffers {
    pub(crate) pool: Vec<u8>,
    pub(crate) ranges: Vec<RangeEntry>,
}

impl Buffers {
    /// Create empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap already-read file bytes.
    pub fn from_bytes(pool: Vec<u8>) -> Self {
        Self {
            pool,
            ranges: Vec::new(),
        }
    }

    /// The raw byte buffer the next file is read into.
    pub fn pool_mut(&mut self) -> &mut Vec<u8> {
        &mut self.pool
    }

    /// Allocated capacity in bytes (pool) and rows (ranges).
    pub fn capacity(&self) -> (usize, usize) {
        (self.pool.capacity(), self.ranges.capacity())
    }
}

/// One fully decoded, validated database.
///
/// Never mutated after construction; published behind an `Arc` and
/// shared by every concurrent lookup.
#[derive(Debug)]
pub struct Snapshot {
    pub(crate) prefix_start: [u32; PREFIX_COUNT],
    pub(crate) prefix_end: [u32; PREFIX_COUNT],
    pub(crate) ranges: Vec<RangeEntry>,
    pub(crate) pool: Vec<u8>,
    pub(crate) version: String,
    pub(crate) digest: String,
}

impl Snapshot {
    /// Date-stamp version assigned when the snapshot was built.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Hex SHA-256 of the decoded file.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Number of rows in the range table.
    pub fn record_count(&self) -> usize {
        self.ranges.len()
    }

    /// Bucket bounds `(start, end)` for a first octet.
    pub fn bucket(&self, prefix: u8) -> (u32, u32) {
        (
            self.prefix_start[prefix as usize],
            self.prefix_end[prefix as usize],
        )
    }

    /// Resolve an address to its range-table index.
    ///
    /// A bucket with a single candidate resolves to that candidate without
    /// comparing range ends.
    pub fn find(&self, ip: Ipv4Addr) -> Option<usize> {
        let (low, high) = self.bucket(ip.octets()[0]);
        let (low, high) = (low as usize, high as usize);
        if low == high {
            return (low < self.ranges.len()).then_some(low);
        }
        search(&self.ranges, low, high, u32::from(ip))
    }

    /// Raw pipe-delimited record string for a dotted-quad address.
    pub fn record_str(&self, ip: &str) -> Result<&str> {
        let addr = parse_ipv4(ip)?;
        let idx = self
            .find(addr)
            .ok_or_else(|| Error::NotFound(ip.to_string()))?;
        self.record_at(idx)
    }

    /// Record string stored at a range-table index.
    pub fn record_at(&self, idx: usize) -> Result<&str> {
        let entry = self
            .ranges
            .get(idx)
            .ok_or_else(|| Error::Format(format!("range index {} out of bounds", idx)))?;
        let bytes = self
            .pool
            .get(entry.span())
            .ok_or_else(|| Error::Format(format!("record span {:?} out of bounds", entry.span())))?;
        std::str::from_utf8(bytes)
            .map_err(|e| Error::Format(format!("record {} is not valid UTF-8: {}", idx, e)))
    }

    /// Look up and parse the record for a dotted-quad address.
    pub fn lookup(&self, ip: &str) -> Result<GeoRecord> {
        GeoRecord::parse(self.record_str(ip)?)
    }

    /// Give back the allocations for reuse by a later decode.
    pub fn into_buffers(self) -> Buffers {
        Buffers {
            pool: self.pool,
            ranges: self.ranges,
        }
    }
}

/// Parse a dotted-quad IPv4 address.
pub fn parse_ipv4(ip: &str) -> Result<Ipv4Addr> {
    ip.parse::<Ipv4Addr>()
        .map_err(|_| Error::InvalidInput(ip.to_string()))
}

/// Leftmost index in `ranges[low..=high]` whose `end_ip >= target`.
///
/// Among equal `end_ip` values the lowest index wins. Returns `None` when
/// every entry in the window ends below `target`, or when the window is
/// not inside `ranges`.
pub fn search(ranges: &[RangeEntry], low: usize, high: usize, target: u32) -> Option<usize> {
    let window = ranges.get(low..=high)?;
    let pos = window.partition_point(|r| r.end_ip < target);
    (pos < window.len()).then_some(low + pos)
}
