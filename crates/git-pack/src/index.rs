//! Pack index (v2) reading and lookup.
//!
//! The pack index provides fast OID → offset mapping using a fan-out table
//! and binary search, plus the reverse mapping (offset → OID, sorted by
//! offset) that the pack entry reader needs to size each entry's
//! compressed slice. Format:
//!
//! ```text
//! Header:  \xff tOc (4 bytes) | version (4 bytes = 2)
//! Fanout:  256 × 4-byte big-endian cumulative counts
//! OIDs:    N × 20-byte sorted OIDs
//! CRC32:   N × 4-byte CRC32 values (skipped, never read)
//! Offsets: N × 4-byte offsets; bit 31 set means an extended 64-bit table
//!          entry, which this reader refuses to follow
//! Trailer: 20-byte pack checksum | 20-byte index checksum (skipped)
//! ```

use std::path::{Path, PathBuf};

use git_hash::fanout::FanoutTable;
use git_hash::ObjectId;
use memmap2::Mmap;

use crate::{PackError, IDX_SIGNATURE, IDX_VERSION};

const HASH_LEN: usize = 20;

/// Pack index (v2) providing OID → offset and offset → OID mappings.
pub struct PackIndex {
    data: Mmap,
    version: u32,
    fanout: FanoutTable,
    /// Byte offset where sorted OIDs start.
    oid_offset: usize,
    /// Byte offset where 32-bit offsets start.
    offset32_offset: usize,
    /// Path to the .idx file.
    idx_path: PathBuf,
    /// `(pack_offset, name_table_index)`, sorted ascending by `pack_offset`.
    /// Built once at open time since the on-disk tables are sorted by OID,
    /// not by offset, and entry byte-length needs the offset ordering.
    by_offset: Vec<(u64, u32)>,
}

impl PackIndex {
    /// Open a pack index file.
    ///
    /// Any entry whose offset has bit 31 set (extended 64-bit offset) fails
    /// the whole index with `UnsupportedIndex`; this reader never follows
    /// the extended offset table.
    pub fn open(idx_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let idx_path = idx_path.as_ref().to_path_buf();
        let file = std::fs::File::open(&idx_path)?;
        let data = unsafe { Mmap::map(&file)? };

        if data.len() < 8 + 1024 + 2 * HASH_LEN {
            return Err(PackError::UnsupportedIndex("file too small".into()));
        }
        if data[0..4] != IDX_SIGNATURE {
            return Err(PackError::UnsupportedIndex("bad signature".into()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != IDX_VERSION {
            return Err(PackError::UnsupportedIndex(format!(
                "unsupported index version {version}, expected {IDX_VERSION}"
            )));
        }

        let fanout_offset = 8;
        let fanout = FanoutTable::from_bytes(&data[fanout_offset..fanout_offset + 1024])?;
        let num_objects = fanout.total();

        let n = num_objects as usize;
        let oid_offset = fanout_offset + 1024;
        let crc_offset = oid_offset + n * HASH_LEN;
        let offset32_offset = crc_offset + n * 4;

        let min_size = offset32_offset + n * 4 + 2 * HASH_LEN;
        if data.len() < min_size {
            return Err(PackError::UnsupportedIndex(format!(
                "file too small: {} < {min_size}",
                data.len()
            )));
        }

        let mut by_offset = Vec::with_capacity(n);
        for i in 0..n {
            let pos = offset32_offset + i * 4;
            let raw = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            if raw & 0x8000_0000 != 0 {
                return Err(PackError::UnsupportedIndex(
                    "extended 64-bit pack offsets are not supported".into(),
                ));
            }
            by_offset.push((raw as u64, i as u32));
        }
        by_offset.sort_unstable_by_key(|&(offset, _)| offset);

        Ok(Self {
            data,
            version,
            fanout,
            oid_offset,
            offset32_offset,
            idx_path,
            by_offset,
        })
    }

    /// Look up an OID, returning its offset in the pack file.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u64> {
        let range = self.fanout.range(oid.first_byte());
        let (lo, hi) = (range.start, range.end);
        if lo >= hi {
            return None;
        }
        let target = oid.as_bytes();

        let mut low = lo;
        let mut high = hi;
        while low < high {
            let mid = low + (high - low) / 2;
            match self.oid_bytes_at(mid).cmp(target) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(self.offset_at_index(mid as u32)),
            }
        }
        None
    }

    /// Look up the OID stored at a given pack offset, if any entry has it.
    pub fn oid_at_offset(&self, offset: u64) -> Option<ObjectId> {
        self.by_offset
            .binary_search_by_key(&offset, |&(o, _)| o)
            .ok()
            .map(|pos| self.oid_at_index(self.by_offset[pos].1))
    }

    /// The byte length of the entry starting at `offset`: the gap to the
    /// next entry's offset, or `pack_len - 20` (the trailing checksum) for
    /// the last entry. Returns `None` if `offset` is not a known entry.
    pub fn entry_byte_length(&self, offset: u64, pack_len: u64) -> Option<u64> {
        let pos = self
            .by_offset
            .binary_search_by_key(&offset, |&(o, _)| o)
            .ok()?;
        let end = self
            .by_offset
            .get(pos + 1)
            .map(|&(next, _)| next)
            .unwrap_or_else(|| pack_len - crate::PACK_TRAILER_SIZE);
        Some(end - offset)
    }

    /// All `(pack_offset, oid)` pairs, sorted ascending by offset.
    pub fn entries_by_offset(&self) -> impl Iterator<Item = (u64, ObjectId)> + '_ {
        self.by_offset
            .iter()
            .map(move |&(offset, idx)| (offset, self.oid_at_index(idx)))
    }

    /// Get the OID at the given OID-sorted index position.
    pub fn oid_at_index(&self, index: u32) -> ObjectId {
        let start = self.oid_offset + index as usize * HASH_LEN;
        ObjectId::from_bytes(&self.data[start..start + HASH_LEN]).expect("valid OID in index")
    }

    /// Get the pack file offset at the given OID-sorted index position.
    pub fn offset_at_index(&self, index: u32) -> u64 {
        let pos = self.offset32_offset + index as usize * 4;
        u32::from_be_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ]) as u64
    }

    /// Total number of objects in this index.
    pub fn num_objects(&self) -> u32 {
        self.fanout.total()
    }

    /// Index version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Path to the .idx file.
    pub fn path(&self) -> &Path {
        &self.idx_path
    }

    fn oid_bytes_at(&self, index: usize) -> &[u8] {
        let start = self.oid_offset + index * HASH_LEN;
        &self.data[start..start + HASH_LEN]
    }
}
