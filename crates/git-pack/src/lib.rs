//! Packfile reading: index v2 lookup, entry header decoding, delta resolution.
//!
//! This crate covers the leaf components of a pack reader — byte cursor,
//! varint decoding, zlib inflation, index and entry parsing, delta
//! application — without owning the cross-pack orchestration that turns a
//! `PackEntryType::OfsDelta`/`RefDelta` into a fully resolved object; that
//! lives in `git-odb`, which is the only thing that also knows about loose
//! objects and other packs.

pub mod cursor;
pub mod delta;
pub mod entry;
pub mod inflate;
pub mod index;
pub mod pack;
pub mod varint;

use git_hash::ObjectId;
use git_object::ObjectType;

/// Errors from pack index, entry, and delta reading.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("invalid pack header: {0}")]
    InvalidHeader(String),

    #[error("unsupported pack index: {0}")]
    UnsupportedIndex(String),

    #[error("corrupt pack data: {0}")]
    CorruptPack(String),

    #[error("corrupt delta: {0}")]
    CorruptDelta(String),

    #[error("missing delta base object {0}")]
    MissingBase(ObjectId),

    #[error("delta chain exceeds max depth {max_depth} at offset {offset}")]
    DeltaChainTooDeep { offset: u64, max_depth: usize },

    #[error("delta chain cycle detected at offset {offset}")]
    Cycle { offset: u64 },

    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    #[error("read past end of region")]
    Truncated,

    #[error("varint exceeds maximum encoded length")]
    Overflow,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("object parse error: {0}")]
    Object(#[from] git_object::ObjectError),

    #[error("hash error: {0}")]
    Hash(#[from] git_hash::HashError),
}

/// The pack-only and real object type tags a pack entry header can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackEntryType {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta against an earlier entry in the same pack, `rel_offset` bytes back.
    OfsDelta { rel_offset: u64 },
    /// Delta against an object named by full OID, possibly outside this pack.
    RefDelta { base_oid: ObjectId },
}

impl PackEntryType {
    /// The real object type this entry resolves to directly, or `None` for
    /// the two delta variants (which resolve to their base's type).
    pub fn to_object_type(self) -> Option<ObjectType> {
        match self {
            PackEntryType::Commit => Some(ObjectType::Commit),
            PackEntryType::Tree => Some(ObjectType::Tree),
            PackEntryType::Blob => Some(ObjectType::Blob),
            PackEntryType::Tag => Some(ObjectType::Tag),
            PackEntryType::OfsDelta { .. } | PackEntryType::RefDelta { .. } => None,
        }
    }

    pub fn is_delta(self) -> bool {
        matches!(
            self,
            PackEntryType::OfsDelta { .. } | PackEntryType::RefDelta { .. }
        )
    }
}

/// A fully materialized object read out of a pack: a real type plus its
/// delta-resolved payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedObject {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
}

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_SIZE: usize = 12;
/// Pack trailer is a 20-byte SHA-1, never read, only used to size the last entry.
pub const PACK_TRAILER_SIZE: u64 = 20;

pub const IDX_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];
pub const IDX_VERSION: u32 = 2;

/// Cap on delta chain depth, turning a malicious or corrupt cycle into a
/// bounded error instead of an unbounded loop.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 512;
