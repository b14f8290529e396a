//! Pack entry header parsing.
//!
//! Reads the type tag, uncompressed size, and (for delta types) the base
//! reference out of a pack entry header. Does not touch the compressed
//! payload that follows — sizing and inflating that slice is the caller's
//! job, since it needs the index's offset ordering to know where the next
//! entry begins.

use git_hash::ObjectId;

use crate::cursor::Cursor;
use crate::{varint, PackEntryType, PackError};

const REF_DELTA_OID_LEN: usize = 20;

/// A parsed pack entry header.
#[derive(Debug, Clone)]
pub struct PackEntry {
    pub entry_type: PackEntryType,
    pub uncompressed_size: usize,
    /// Number of bytes the header occupied; the compressed payload starts
    /// immediately after it.
    pub header_len: usize,
}

/// Parses a pack entry header starting at `data[0]`.
///
/// `data` must begin exactly at the entry's first byte (the pack's mmap
/// slice from the entry's offset onward); it may extend arbitrarily far
/// past the header, since the header's own length isn't known in advance.
pub fn parse_entry_header(data: &[u8]) -> Result<PackEntry, PackError> {
    let mut cursor = Cursor::new(data);
    let first = cursor.peek_u8()?;
    let type_code = (first >> 4) & 0b111;

    let (header_len, uncompressed_size) = varint::decode_size(data, 4)?;
    cursor.seek(header_len)?;

    let entry_type = match type_code {
        1 => PackEntryType::Commit,
        2 => PackEntryType::Tree,
        3 => PackEntryType::Blob,
        4 => PackEntryType::Tag,
        6 => {
            let (ofs_len, rel_offset) = varint::decode_offset(&data[cursor.position()..])?;
            let next = cursor.position() + ofs_len;
            cursor.seek(next)?;
            PackEntryType::OfsDelta { rel_offset }
        }
        7 => {
            let oid_bytes = cursor.read_bytes(REF_DELTA_OID_LEN)?;
            let base_oid = ObjectId::from_bytes(oid_bytes)?;
            PackEntryType::RefDelta { base_oid }
        }
        other => {
            return Err(PackError::CorruptPack(format!(
                "reserved pack entry type code {other}"
            )))
        }
    };

    Ok(PackEntry {
        entry_type,
        uncompressed_size: uncompressed_size as usize,
        header_len: cursor.position(),
    })
}
