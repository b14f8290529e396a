//! `PackFile`: a memory-mapped `.pack` file paired with its `.idx`.
//!
//! Resolves delta chains that stay inside this pack (`OfsDelta`) on its
//! own; a `RefDelta` whose base isn't in this pack's index is handed to an
//! external resolver closure, since finding it means consulting loose
//! objects or other packs — the store's job, not this crate's.

use std::path::{Path, PathBuf};

use git_hash::ObjectId;
use git_object::ObjectType;
use memmap2::Mmap;

use crate::entry::{parse_entry_header, PackEntry};
use crate::index::PackIndex;
use crate::{
    delta, inflate, PackEntryType, PackError, PackedObject, MAX_DELTA_CHAIN_DEPTH,
    PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION,
};

/// A memory-mapped packfile with its index.
pub struct PackFile {
    data: Mmap,
    index: PackIndex,
    pack_path: PathBuf,
    num_objects: u32,
}

impl PackFile {
    /// Opens a pack file and its associated `.idx`, derived by replacing
    /// the `.pack` extension.
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref().to_path_buf();
        let idx_path = pack_path.with_extension("idx");

        let file = std::fs::File::open(&pack_path)?;
        let data = unsafe { Mmap::map(&file)? };

        if data.len() < PACK_HEADER_SIZE {
            return Err(PackError::InvalidHeader("file too small".into()));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(PackError::InvalidHeader("bad PACK signature".into()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let num_objects = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let index = PackIndex::open(&idx_path)?;
        if index.num_objects() != num_objects {
            return Err(PackError::InvalidHeader(format!(
                "pack header claims {num_objects} objects but index has {}",
                index.num_objects()
            )));
        }

        Ok(Self {
            data,
            index,
            pack_path,
            num_objects,
        })
    }

    /// Reads an object by OID, resolving any delta chain. Returns `None`
    /// if the OID is not present in this pack's index.
    pub fn read_object(&self, oid: &ObjectId) -> Result<Option<PackedObject>, PackError> {
        self.read_object_with_resolver(oid, |_| None)
    }

    /// Reads an object at a known offset, resolving any delta chain.
    pub fn read_at_offset(&self, offset: u64) -> Result<PackedObject, PackError> {
        self.read_at_offset_with_resolver(offset, |_| None)
    }

    /// Reads an object by OID, consulting `resolver` for any `RefDelta`
    /// base this pack's own index doesn't contain.
    pub fn read_object_with_resolver(
        &self,
        oid: &ObjectId,
        resolver: impl Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<Option<PackedObject>, PackError> {
        match self.index.lookup(oid) {
            Some(offset) => self.read_at_offset_with_resolver(offset, resolver).map(Some),
            None => Ok(None),
        }
    }

    /// Reads an object at a known offset, consulting `resolver` for any
    /// `RefDelta` base this pack's own index doesn't contain. Exposed (not
    /// just `read_object_with_resolver`) so a caller that already knows the
    /// offset — a store walking its own `(pack, offset)` record — can skip
    /// the redundant OID lookup.
    pub fn read_at_offset_with_resolver(
        &self,
        offset: u64,
        resolver: impl Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<PackedObject, PackError> {
        // Innermost delta first, base last.
        let mut chain: Vec<Vec<u8>> = Vec::new();
        let mut visiting: Vec<u64> = Vec::new();
        let mut current_offset = offset;

        loop {
            if visiting.contains(&current_offset) {
                return Err(PackError::Cycle { offset: current_offset });
            }
            visiting.push(current_offset);
            if visiting.len() > MAX_DELTA_CHAIN_DEPTH {
                return Err(PackError::DeltaChainTooDeep {
                    offset,
                    max_depth: MAX_DELTA_CHAIN_DEPTH,
                });
            }

            let entry = parse_entry_header(&self.data[current_offset as usize..])?;
            let decompressed = self.inflate_entry(current_offset, &entry)?;

            match entry.entry_type {
                PackEntryType::Commit | PackEntryType::Tree | PackEntryType::Blob | PackEntryType::Tag => {
                    let obj_type = entry.entry_type.to_object_type().expect("non-delta type");
                    let mut data = decompressed;
                    for delta_data in chain.iter().rev() {
                        data = delta::apply::apply_delta(&data, delta_data)?;
                    }
                    return Ok(PackedObject { obj_type, data });
                }
                PackEntryType::OfsDelta { rel_offset } => {
                    chain.push(decompressed);
                    current_offset = current_offset.checked_sub(rel_offset).ok_or_else(|| {
                        PackError::CorruptPack(format!(
                            "OFS_DELTA at {current_offset} points before start of pack"
                        ))
                    })?;
                }
                PackEntryType::RefDelta { base_oid } => {
                    chain.push(decompressed);
                    if let Some(base_offset) = self.index.lookup(&base_oid) {
                        current_offset = base_offset;
                    } else if let Some((obj_type, base_data)) = resolver(&base_oid) {
                        let mut data = base_data;
                        for delta_data in chain.iter().rev() {
                            data = delta::apply::apply_delta(&data, delta_data)?;
                        }
                        return Ok(PackedObject { obj_type, data });
                    } else {
                        return Err(PackError::MissingBase(base_oid));
                    }
                }
            }
        }
    }

    /// Resolves the object type at a known offset by walking entry headers
    /// only, never inflating a payload. Cheap even across long delta chains;
    /// a `RefDelta` base outside this pack is handed to `resolver`.
    pub fn resolve_type_at_offset(
        &self,
        offset: u64,
        resolver: impl Fn(&ObjectId) -> Option<ObjectType>,
    ) -> Result<ObjectType, PackError> {
        let mut visiting: Vec<u64> = Vec::new();
        let mut current_offset = offset;

        loop {
            if visiting.contains(&current_offset) {
                return Err(PackError::Cycle { offset: current_offset });
            }
            visiting.push(current_offset);
            if visiting.len() > MAX_DELTA_CHAIN_DEPTH {
                return Err(PackError::DeltaChainTooDeep {
                    offset,
                    max_depth: MAX_DELTA_CHAIN_DEPTH,
                });
            }

            let entry = parse_entry_header(&self.data[current_offset as usize..])?;
            match entry.entry_type {
                PackEntryType::Commit | PackEntryType::Tree | PackEntryType::Blob | PackEntryType::Tag => {
                    return Ok(entry.entry_type.to_object_type().expect("non-delta type"));
                }
                PackEntryType::OfsDelta { rel_offset } => {
                    current_offset = current_offset.checked_sub(rel_offset).ok_or_else(|| {
                        PackError::CorruptPack(format!(
                            "OFS_DELTA at {current_offset} points before start of pack"
                        ))
                    })?;
                }
                PackEntryType::RefDelta { base_oid } => {
                    if let Some(base_offset) = self.index.lookup(&base_oid) {
                        current_offset = base_offset;
                    } else if let Some(obj_type) = resolver(&base_oid) {
                        return Ok(obj_type);
                    } else {
                        return Err(PackError::MissingBase(base_oid));
                    }
                }
            }
        }
    }

    /// Inflates a single entry's compressed payload, sizing the compressed
    /// slice exactly from the index's offset ordering.
    fn inflate_entry(&self, offset: u64, entry: &PackEntry) -> Result<Vec<u8>, PackError> {
        let entry_byte_length = self
            .index
            .entry_byte_length(offset, self.data.len() as u64)
            .ok_or_else(|| PackError::CorruptPack(format!("offset {offset} is not indexed")))?;
        let compressed_start = offset as usize + entry.header_len;
        let compressed_len = (entry_byte_length as usize)
            .checked_sub(entry.header_len)
            .ok_or_else(|| {
                PackError::CorruptPack(format!("entry at {offset} has no room for payload"))
            })?;
        let end = compressed_start
            .checked_add(compressed_len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| PackError::CorruptPack(format!("entry at {offset} overruns pack")))?;
        inflate::inflate_exact(&self.data[compressed_start..end], entry.uncompressed_size)
    }

    /// Checks whether this pack's index contains the given OID.
    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.lookup(oid).is_some()
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn path(&self) -> &Path {
        &self.pack_path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use git_hash::hasher::Hasher;
    use std::io::Write;

    fn encode_header(type_num: u8, size: u64) -> Vec<u8> {
        let mut s = size;
        let mut c = (type_num << 4) | (s & 0x0f) as u8;
        s >>= 4;
        let mut buf = Vec::new();
        while s > 0 {
            buf.push(c | 0x80);
            c = (s & 0x7f) as u8;
            s >>= 7;
        }
        buf.push(c);
        buf
    }

    fn encode_ofs_offset(rel_offset: u64) -> Vec<u8> {
        let mut off = rel_offset;
        let mut buf = vec![(off & 0x7f) as u8];
        off >>= 7;
        while off > 0 {
            off -= 1;
            buf.push(0x80 | (off & 0x7f) as u8);
            off >>= 7;
        }
        buf.reverse();
        buf
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn type_num(ty: ObjectType) -> u8 {
        match ty {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        }
    }

    fn build_test_idx(entries: &[(ObjectId, u64)]) -> Vec<u8> {
        use crate::{IDX_SIGNATURE, IDX_VERSION};

        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut buf = Vec::new();
        buf.extend_from_slice(&IDX_SIGNATURE);
        buf.extend_from_slice(&IDX_VERSION.to_be_bytes());

        let mut fanout = [0u32; 256];
        for (oid, _) in &sorted {
            fanout[oid.first_byte() as usize] += 1;
        }
        for i in 1..256 {
            fanout[i] += fanout[i - 1];
        }
        for count in fanout {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for (oid, _) in &sorted {
            buf.extend_from_slice(oid.as_bytes());
        }
        for _ in &sorted {
            buf.extend_from_slice(&0u32.to_be_bytes()); // CRC32, unused
        }
        for (_, offset) in &sorted {
            buf.extend_from_slice(&(*offset as u32).to_be_bytes());
        }

        buf.extend_from_slice(&[0u8; 20]); // pack checksum, unused
        let idx_checksum = Hasher::digest(&buf).unwrap();
        buf.extend_from_slice(idx_checksum.as_bytes());
        buf
    }

    /// Builds a minimal valid `.pack` + `.idx` pair for the given entries
    /// and writes them into `dir`. Returns the pack path and each entry's OID.
    fn build_test_pack(dir: &Path, objects: &[(ObjectType, &[u8])]) -> (PathBuf, Vec<ObjectId>) {
        let pack_path = dir.join("test.pack");
        let idx_path = dir.join("test.idx");

        let mut pack_data = Vec::new();
        pack_data.extend_from_slice(PACK_SIGNATURE);
        pack_data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack_data.extend_from_slice(&(objects.len() as u32).to_be_bytes());

        let mut entries: Vec<(ObjectId, u64)> = Vec::new();
        for (obj_type, content) in objects {
            let offset = pack_data.len() as u64;
            let header = encode_header(type_num(*obj_type), content.len() as u64);
            let compressed = zlib(content);
            let oid = Hasher::hash_object(&obj_type.to_string(), content).unwrap();

            pack_data.extend_from_slice(&header);
            pack_data.extend_from_slice(&compressed);
            entries.push((oid, offset));
        }

        let pack_checksum = Hasher::digest(&pack_data).unwrap();
        pack_data.extend_from_slice(pack_checksum.as_bytes());

        std::fs::write(&pack_path, &pack_data).unwrap();
        std::fs::write(&idx_path, build_test_idx(&entries)).unwrap();

        let oids = entries.into_iter().map(|(oid, _)| oid).collect();
        (pack_path, oids)
    }

    #[test]
    fn read_single_blob() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"Hello, packfile world!";
        let (pack_path, oids) = build_test_pack(dir.path(), &[(ObjectType::Blob, content)]);

        let pack = PackFile::open(&pack_path).unwrap();
        assert_eq!(pack.num_objects(), 1);

        let obj = pack.read_object(&oids[0]).unwrap().unwrap();
        assert_eq!(obj.obj_type, ObjectType::Blob);
        assert_eq!(obj.data, content);
    }

    #[test]
    fn read_multiple_objects() {
        let dir = tempfile::tempdir().unwrap();
        let objects = vec![
            (ObjectType::Blob, b"blob content".as_slice()),
            (ObjectType::Blob, b"another blob".as_slice()),
            (
                ObjectType::Commit,
                b"tree 0000000000000000000000000000000000000000\nauthor Test <test@test.com> 0 +0000\ncommitter Test <test@test.com> 0 +0000\n\ntest commit\n".as_slice(),
            ),
        ];
        let (pack_path, oids) = build_test_pack(dir.path(), &objects);

        let pack = PackFile::open(&pack_path).unwrap();
        assert_eq!(pack.num_objects(), 3);
        for (i, (obj_type, content)) in objects.iter().enumerate() {
            let obj = pack.read_object(&oids[i]).unwrap().unwrap();
            assert_eq!(obj.obj_type, *obj_type);
            assert_eq!(obj.data, *content);
        }
    }

    #[test]
    fn contains_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (pack_path, oids) = build_test_pack(dir.path(), &[(ObjectType::Blob, b"test")]);

        let pack = PackFile::open(&pack_path).unwrap();
        assert!(pack.contains(&oids[0]));

        let missing = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        assert!(!pack.contains(&missing));
        assert_eq!(pack.read_object(&missing).unwrap(), None);
    }

    #[test]
    fn read_ofs_delta_object() {
        let dir = tempfile::tempdir().unwrap();
        let pack_path = dir.path().join("test.pack");
        let idx_path = dir.path().join("test.idx");

        let base_content = b"Hello, this is the base object content for delta testing!";
        let base_header = encode_header(3, base_content.len() as u64);
        let base_compressed = zlib(base_content);

        // A delta that drops the base entirely and inserts new content, so
        // this exercises chain-walking without needing a real diff.
        let target = b"freshly inserted target content";
        let mut delta_bytes = Vec::new();
        delta_bytes.push(base_content.len() as u8); // base size varint
        delta_bytes.push(target.len() as u8); // result size varint
        delta_bytes.push(target.len() as u8); // INSERT opcode
        delta_bytes.extend_from_slice(target);

        let base_offset_in_pack = PACK_HEADER_SIZE as u64;
        let delta_offset_in_pack =
            PACK_HEADER_SIZE as u64 + base_header.len() as u64 + base_compressed.len() as u64;
        let rel_offset = delta_offset_in_pack - base_offset_in_pack;

        let delta_header = encode_header(6, delta_bytes.len() as u64); // OFS_DELTA
        let ofs_encoded = encode_ofs_offset(rel_offset);
        let delta_compressed = zlib(&delta_bytes);

        let mut pack_data = Vec::new();
        pack_data.extend_from_slice(PACK_SIGNATURE);
        pack_data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack_data.extend_from_slice(&2u32.to_be_bytes());

        let base_entry_offset = pack_data.len() as u64;
        pack_data.extend_from_slice(&base_header);
        pack_data.extend_from_slice(&base_compressed);

        let delta_entry_offset = pack_data.len() as u64;
        pack_data.extend_from_slice(&delta_header);
        pack_data.extend_from_slice(&ofs_encoded);
        pack_data.extend_from_slice(&delta_compressed);

        let pack_checksum = Hasher::digest(&pack_data).unwrap();
        pack_data.extend_from_slice(pack_checksum.as_bytes());
        std::fs::write(&pack_path, &pack_data).unwrap();

        let base_oid = Hasher::hash_object("blob", base_content).unwrap();
        let target_oid = Hasher::hash_object("blob", target).unwrap();

        let idx_data = build_test_idx(&[
            (base_oid, base_entry_offset),
            (target_oid, delta_entry_offset),
        ]);
        std::fs::write(&idx_path, &idx_data).unwrap();

        let pack = PackFile::open(&pack_path).unwrap();
        assert_eq!(pack.num_objects(), 2);

        let base_obj = pack.read_object(&base_oid).unwrap().unwrap();
        assert_eq!(base_obj.data, base_content.as_slice());

        let delta_obj = pack.read_object(&target_oid).unwrap().unwrap();
        assert_eq!(delta_obj.obj_type, ObjectType::Blob);
        assert_eq!(delta_obj.data, target.as_slice());
    }

    #[test]
    fn ref_delta_resolved_by_external_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let pack_path = dir.path().join("test.pack");
        let idx_path = dir.path().join("test.idx");

        let external_base = b"content living in a different pack or loose store";
        let target = b"INSERTED-ONLY-TARGET";
        let mut delta_bytes = Vec::new();
        delta_bytes.push(external_base.len() as u8);
        delta_bytes.push(target.len() as u8);
        delta_bytes.push(target.len() as u8);
        delta_bytes.extend_from_slice(target);

        let delta_header = encode_header(7, delta_bytes.len() as u64); // REF_DELTA
        let external_base_oid = Hasher::hash_object("blob", external_base).unwrap();
        let delta_compressed = zlib(&delta_bytes);

        let mut pack_data = Vec::new();
        pack_data.extend_from_slice(PACK_SIGNATURE);
        pack_data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack_data.extend_from_slice(&1u32.to_be_bytes());

        let delta_entry_offset = pack_data.len() as u64;
        pack_data.extend_from_slice(&delta_header);
        pack_data.extend_from_slice(external_base_oid.as_bytes());
        pack_data.extend_from_slice(&delta_compressed);

        let pack_checksum = Hasher::digest(&pack_data).unwrap();
        pack_data.extend_from_slice(pack_checksum.as_bytes());
        std::fs::write(&pack_path, &pack_data).unwrap();

        let target_oid = Hasher::hash_object("blob", target).unwrap();
        let idx_data = build_test_idx(&[(target_oid, delta_entry_offset)]);
        std::fs::write(&idx_path, &idx_data).unwrap();

        let pack = PackFile::open(&pack_path).unwrap();
        let resolver = |oid: &ObjectId| {
            if *oid == external_base_oid {
                Some((ObjectType::Blob, external_base.to_vec()))
            } else {
                None
            }
        };
        let resolved = pack
            .read_object_with_resolver(&target_oid, resolver)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.data, target.as_slice());

        let unresolved = pack.read_object_with_resolver(&target_oid, |_| None);
        assert!(matches!(unresolved, Err(PackError::MissingBase(_))));
    }

    #[test]
    fn resolve_type_at_offset_walks_ofs_delta_chain_without_inflating() {
        let dir = tempfile::tempdir().unwrap();
        let objects = vec![
            (ObjectType::Blob, b"base content for type resolution".as_slice()),
        ];
        let (pack_path, oids) = build_test_pack(dir.path(), &objects);
        let pack = PackFile::open(&pack_path).unwrap();
        let offset = pack.index().lookup(&oids[0]).unwrap();

        let resolved = pack.resolve_type_at_offset(offset, |_| None).unwrap();
        assert_eq!(resolved, ObjectType::Blob);
    }

    #[test]
    fn resolve_type_at_offset_uses_resolver_for_external_ref_delta() {
        let dir = tempfile::tempdir().unwrap();
        let pack_path = dir.path().join("test.pack");
        let idx_path = dir.path().join("test.idx");

        let target = b"whatever";
        let mut delta_bytes = vec![10u8, target.len() as u8, target.len() as u8];
        delta_bytes.extend_from_slice(target);
        let delta_header = encode_header(7, delta_bytes.len() as u64);
        let external_base_oid = ObjectId::from_hex("0000000000000000000000000000000000000042").unwrap();
        let delta_compressed = zlib(&delta_bytes);

        let mut pack_data = Vec::new();
        pack_data.extend_from_slice(PACK_SIGNATURE);
        pack_data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack_data.extend_from_slice(&1u32.to_be_bytes());
        let delta_offset = pack_data.len() as u64;
        pack_data.extend_from_slice(&delta_header);
        pack_data.extend_from_slice(external_base_oid.as_bytes());
        pack_data.extend_from_slice(&delta_compressed);
        let pack_checksum = Hasher::digest(&pack_data).unwrap();
        pack_data.extend_from_slice(pack_checksum.as_bytes());
        std::fs::write(&pack_path, &pack_data).unwrap();

        let target_oid = Hasher::hash_object("blob", target).unwrap();
        std::fs::write(&idx_path, build_test_idx(&[(target_oid, delta_offset)])).unwrap();

        let pack = PackFile::open(&pack_path).unwrap();
        let resolved = pack
            .resolve_type_at_offset(delta_offset, |oid| {
                (*oid == external_base_oid).then_some(ObjectType::Tree)
            })
            .unwrap();
        assert_eq!(resolved, ObjectType::Tree);
    }
}
