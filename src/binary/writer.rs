//! Database file writer.
//!
//! Builds files in the layout the decoder reads. Used by the `pack`
//! command, the benchmark and tests.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::net::Ipv4Addr;

use super::format::*;
use crate::record::GeoRecord;
use crate::{Error, Result};

/// Collects address ranges and serializes them.
///
/// Ranges should tile the address space: the format stores only range
/// ends, so an address in a gap resolves to the next range above it. Past
/// the last range of its first octet it resolves to nothing, unless that
/// octet's bucket holds a single candidate, which always answers.
#[derive(Debug, Default)]
pub struct DatabaseWriter {
    ranges: Vec<(u32, u32, String)>,
}

impl DatabaseWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw record string covering `start..=end`.
    pub fn add_range(&mut self, start: Ipv4Addr, end: Ipv4Addr, record: &str) -> Result<()> {
        let (start, end) = (u32::from(start), u32::from(end));
        if start > end {
            return Err(Error::InvalidInput(format!(
                "range start {} is after end {}",
                Ipv4Addr::from(start),
                Ipv4Addr::from(end)
            )));
        }
        if record.len() > MAX_RECORD_LEN {
            return Err(Error::Format(format!(
                "record of {} bytes exceeds {} bytes",
                record.len(),
                MAX_RECORD_LEN
            )));
        }
        self.ranges.push((start, end, record.to_string()));
        Ok(())
    }

    /// Add a parsed record covering `start..=end`.
    pub fn add_record(&mut self, start: Ipv4Addr, end: Ipv4Addr, record: &GeoRecord) -> Result<()> {
        self.add_range(start, end, &record.fields().join("|"))
    }

    /// Number of ranges added so far.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether no ranges were added.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Serialize to the raw database layout.
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut sorted: Vec<&(u32, u32, String)> = self.ranges.iter().collect();
        sorted.sort_by_key(|(start, _, _)| *start);
        for pair in sorted.windows(2) {
            if pair[1].0 <= pair[0].1 {
                return Err(Error::InvalidInput(format!(
                    "range starting at {} overlaps range ending at {}",
                    Ipv4Addr::from(pair[1].0),
                    Ipv4Addr::from(pair[0].1)
                )));
            }
        }

        let count = sorted.len();
        let pool_base = table_end(count)
            .ok_or_else(|| Error::Format(format!("too many ranges: {}", count)))?;

        // Identical record strings share one pool slot.
        let mut pool = Vec::new();
        let mut slots: HashMap<&str, u32> = HashMap::new();
        let mut entries = Vec::with_capacity(count);
        for (_, end, record) in &sorted {
            let offset = match slots.get(record.as_str()) {
                Some(&offset) => offset,
                None => {
                    let offset = u32::try_from(pool_base + pool.len())
                        .map_err(|_| Error::Format("string pool exceeds 4 GiB".to_string()))?;
                    pool.extend_from_slice(record.as_bytes());
                    slots.insert(record.as_str(), offset);
                    offset
                }
            };
            entries.push(RangeEntry {
                end_ip: *end,
                offset,
                len: record.len() as u8,
            });
        }

        let mut buffer = Vec::with_capacity(pool_base + pool.len());
        buffer.extend_from_slice(&(count as u32).to_le_bytes());
        for (start, end) in bucket_bounds(&entries) {
            buffer.extend_from_slice(&start.to_le_bytes());
            buffer.extend_from_slice(&end.to_le_bytes());
        }
        for entry in &entries {
            buffer.extend_from_slice(&entry.to_bytes());
        }
        buffer.extend_from_slice(&pool);

        log::debug!(
            "Wrote database: {} ranges, {} pool bytes, {} total bytes",
            count,
            pool.len(),
            buffer.len()
        );

        Ok(buffer)
    }

    /// Serialize and wrap in a zip archive holding a single entry.
    pub fn write_zip(&self, entry_name: &str) -> Result<Vec<u8>> {
        let data = self.write()?;
        zip_single(entry_name, &data)
    }
}

/// Wrap bytes in a zip archive with one entry.
pub fn zip_single(entry_name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(entry_name, zip::write::FileOptions::default())?;
    zip.write_all(data)?;
    Ok(zip.finish()?.into_inner())
}

/// Per-first-octet `(start, end)` indices into a range table sorted by end.
///
/// `start` is the first range reaching into the octet's block and `end`
/// the range covering its last address, both clamped to the table.
fn bucket_bounds(entries: &[RangeEntry]) -> Vec<(u32, u32)> {
    let last = entries.len().saturating_sub(1);
    (0..PREFIX_COUNT as u32)
        .map(|p| {
            let block_start = p << 24;
            let block_end = block_start | 0x00FF_FFFF;
            let low = entries.partition_point(|e| e.end_ip < block_start).min(last);
            let high = entries.partition_point(|e| e.end_ip < block_end).min(last);
            (low as u32, high as u32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_rejects_inverted_range() {
        let mut w = DatabaseWriter::new();
        assert!(w.add_range(ip("10.0.0.9"), ip("10.0.0.1"), "x").is_err());
        assert!(w.is_empty());
    }

    #[test]
    fn test_rejects_long_record() {
        let mut w = DatabaseWriter::new();
        let long = "a".repeat(MAX_RECORD_LEN + 1);
        assert!(w.add_range(ip("1.0.0.0"), ip("1.0.0.1"), &long).is_err());
        assert!(w
            .add_range(ip("1.0.0.0"), ip("1.0.0.1"), &long[..MAX_RECORD_LEN])
            .is_ok());
    }

    #[test]
    fn test_rejects_overlap() {
        let mut w = DatabaseWriter::new();
        w.add_range(ip("1.0.0.0"), ip("1.0.0.10"), "a").unwrap();
        w.add_range(ip("1.0.0.10"), ip("1.0.0.20"), "b").unwrap();
        assert!(w.write().is_err());
    }

    #[test]
    fn test_shared_pool_slots() {
        let mut w = DatabaseWriter::new();
        w.add_range(ip("1.0.0.0"), ip("1.0.0.255"), "same").unwrap();
        w.add_range(ip("1.0.1.0"), ip("1.0.1.255"), "same").unwrap();
        let data = w.write().unwrap();
        assert_eq!(data.len(), table_end(2).unwrap() + "same".len());
    }

    #[test]
    fn test_bucket_bounds() {
        let entries: Vec<RangeEntry> = [0x00FF_FFFFu32, 0x0100_00FF, 0x01FF_FFFF, 0xFFFF_FFFF]
            .iter()
            .map(|&end_ip| RangeEntry {
                end_ip,
                ..Default::default()
            })
            .collect();
        let bounds = bucket_bounds(&entries);
        assert_eq!(bounds.len(), PREFIX_COUNT);
        assert_eq!(bounds[0], (0, 0));
        assert_eq!(bounds[1], (1, 2));
        assert_eq!(bounds[2], (3, 3));
        assert_eq!(bounds[255], (3, 3));
    }
}
