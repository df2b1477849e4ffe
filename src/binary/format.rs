//! Binary format constants and structures.

/// Number of first-octet prefix buckets.
pub const PREFIX_COUNT: usize = 256;

/// Size of the leading record count field.
pub const COUNT_SIZE: usize = 4;

/// Size of one `(prefix_start, prefix_end)` pair.
pub const PREFIX_ENTRY_SIZE: usize = 8;

/// Offset of the range table (4 + 256 * 8).
pub const RANGES_OFFSET: usize = COUNT_SIZE + PREFIX_COUNT * PREFIX_ENTRY_SIZE;

/// Size of one range entry: end_ip (u32) + pool offset (u32) + pool length (u8).
pub const RANGE_ENTRY_SIZE: usize = 9;

/// Maximum length of a single record string.
pub const MAX_RECORD_LEN: usize = u8::MAX as usize;

/// One row of the range table.
///
/// The record string lives in the string pool at
/// `offset..offset + len`; offsets are absolute into the decoded buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeEntry {
    /// Last address covered by this range (host order)
    pub end_ip: u32,
    /// Offset of the record string
    pub offset: u32,
    /// Length of the record string
    pub len: u8,
}

impl RangeEntry {
    /// Byte range of the record string within the pool.
    pub fn span(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.len as usize
    }

    /// Serialize to the 9-byte on-disk layout.
    pub fn to_bytes(&self) -> [u8; RANGE_ENTRY_SIZE] {
        let mut out = [0u8; RANGE_ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.end_ip.to_le_bytes());
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8] = self.len;
        out
    }

    /// Parse from the 9-byte on-disk layout.
    pub fn from_bytes(b: &[u8; RANGE_ENTRY_SIZE]) -> Self {
        Self {
            end_ip: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            offset: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            len: b[8],
        }
    }
}

/// Read a little-endian u32 at `pos`, or `None` if it would overrun `data`.
pub fn read_u32_le(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Total bytes occupied by the header and a range table of `count` rows.
pub fn table_end(count: usize) -> Option<usize> {
    count
        .checked_mul(RANGE_ENTRY_SIZE)?
        .checked_add(RANGES_OFFSET)
}
