//! Lazy, memoized object store merging loose objects and packfiles.
//!
//! Loading walks every loose object and every `.pack`/`.idx` pair under an
//! `objects/` directory and builds one flat map from OID to where the object
//! lives, but never inflates or delta-resolves anything at load time. Each
//! [`ObjectStore::get`] call resolves only as much as the caller's
//! [`SemanticParser`] actually needs — type resolution alone is a header
//! walk, never a zlib inflate; materializing the payload and parsing it are
//! each memoized independently and at most once per OID.
//!
//! A loose object and a packed object can legitimately share an OID (e.g.
//! just after `git gc` before the loose copy is pruned); the loose copy
//! wins, since it's more likely to be the newer write.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use git_hash::ObjectId;
use git_loose::{LooseError, LooseObjectStore};
use git_object::{DefaultParser, ObjectType, SemanticParser};
use git_pack::pack::PackFile;
use git_pack::PackError;

/// Where an object's bytes actually live, for callers that care (e.g. `fsck`
/// reporting which pack a corrupt entry came from).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectLocation {
    Loose(PathBuf),
    Pack(PathBuf, u64),
}

/// Same information as [`ObjectLocation`], but shaped for dispatch: a pack
/// index into `ObjectStore::packs` instead of a path, since every lookup
/// needs the open `PackFile`, not just its location on disk.
#[derive(Debug, Clone)]
enum EntrySource {
    Loose,
    Pack(usize, u64),
}

/// Errors from resolving or materializing a single object.
///
/// Wraps [`PackError`]/[`LooseError`] as strings rather than via `#[from]`:
/// both carry a non-`Clone` `std::io::Error`, and memoizing results behind
/// `OnceLock` needs `StoreError: Clone`. The structured delta-chain variants
/// are preserved since callers reasonably branch on them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("missing delta base object {0}")]
    MissingBase(ObjectId),

    #[error("delta chain cycle detected at object {0}")]
    Cycle(ObjectId),

    #[error("delta chain exceeds maximum depth at offset {0}")]
    DeltaChainTooDeep(u64),

    #[error("loose object error: {0}")]
    Loose(String),

    #[error("pack error: {0}")]
    Pack(String),
}

impl From<PackError> for StoreError {
    fn from(e: PackError) -> Self {
        match e {
            PackError::MissingBase(oid) => StoreError::MissingBase(oid),
            PackError::DeltaChainTooDeep { offset, .. } => StoreError::DeltaChainTooDeep(offset),
            // PackError::Cycle is keyed by pack offset; a within-pack cycle is
            // already caught by PackFile's own offset-based visiting set, and
            // has no OID to report without a second index lookup, so it's
            // folded into the generic string form here. Cross-pack cycles get
            // their own OID-keyed StoreError::Cycle, raised directly by
            // ObjectStore before ever delegating into a PackFile.
            other => StoreError::Pack(other.to_string()),
        }
    }
}

impl From<LooseError> for StoreError {
    fn from(e: LooseError) -> Self {
        StoreError::Loose(e.to_string())
    }
}

/// Problems found while loading that don't prevent the store from opening:
/// one bad pack or one unreadable loose object shouldn't take down access to
/// everything else.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadIssue {
    #[error("error enumerating loose objects under {}: {reason}", dir.display())]
    CorruptLoose { dir: PathBuf, reason: String },

    #[error("unsupported pack index {}: {reason}", pack_path.display())]
    UnsupportedIndex { pack_path: PathBuf, reason: String },
}

/// Non-recoverable problems that stop the store from opening at all.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("objects directory not found: {}", .0.display())]
    MissingObjectsDir(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Loose(#[from] LooseError),

    /// Promoted from a [`LoadIssue`] when opened with [`OpenOptions::strict`].
    #[error("{0}")]
    Strict(LoadIssue),
}

/// Everything non-fatal that went wrong while loading, collected instead of
/// aborting so a caller can decide how much tolerance it wants.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub issues: Vec<LoadIssue>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Loading behavior. The default tolerates individually corrupt loose
/// objects and unreadable packs, collecting them in the returned
/// [`LoadReport`]; `strict: true` turns the first one into a [`FatalError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    pub strict: bool,
}

/// One fully resolved object, shaped by whatever the caller's
/// [`SemanticParser`] decided to do with it.
///
/// `size` and `parsed` are `None` when [`SemanticParser::wants_payload`]
/// returned `false` for this object's type: the store then never inflates
/// or delta-resolves it at all, so there's no size or parsed value to give.
#[derive(Debug, Clone)]
pub struct ObjectRecord<T> {
    pub oid: ObjectId,
    pub obj_type: ObjectType,
    pub location: ObjectLocation,
    pub size: Option<usize>,
    pub parsed: Option<T>,
}

/// Per-OID cell holding an object's location plus three independently
/// memoized stages of resolving it: its type (cheap, header-only), its raw
/// payload (expensive, full delta materialization), and the caller's parse
/// of that payload. Each stage runs at most once no matter how many times
/// [`ObjectStore::get`] is called for this OID.
struct RecordSlot<T> {
    location: ObjectLocation,
    source: EntrySource,
    resolved_type: OnceLock<Result<ObjectType, StoreError>>,
    payload: OnceLock<Result<Arc<Vec<u8>>, StoreError>>,
    parsed: OnceLock<Result<T, StoreError>>,
}

impl<T> RecordSlot<T> {
    fn new(location: ObjectLocation, source: EntrySource) -> Self {
        Self {
            location,
            source,
            resolved_type: OnceLock::new(),
            payload: OnceLock::new(),
            parsed: OnceLock::new(),
        }
    }
}

/// A flat, lazily-resolving view over every object reachable from an
/// `objects/` directory, loose or packed.
pub struct ObjectStore<P: SemanticParser> {
    records: HashMap<ObjectId, Arc<RecordSlot<P::Output>>>,
    packs: Vec<PackFile>,
    loose: LooseObjectStore,
    parser: P,
    objects_dir: PathBuf,
}

impl ObjectStore<DefaultParser> {
    /// Opens the store at `objects_dir`, parsing payloads into
    /// [`git_object::Object`] and tolerating individually corrupt entries.
    pub fn open(objects_dir: impl AsRef<Path>) -> Result<(Self, LoadReport), FatalError> {
        Self::open_with(objects_dir, DefaultParser, OpenOptions::default())
    }
}

impl<P: SemanticParser> ObjectStore<P> {
    /// Opens the store at `objects_dir` with a custom parser and loading
    /// behavior.
    ///
    /// Enumerates every `.pack`/`.idx` pair under `objects/pack/` first,
    /// then every loose object; a loose object whose OID collides with a
    /// packed one overwrites the packed entry, so loose always wins.
    pub fn open_with(
        objects_dir: impl AsRef<Path>,
        parser: P,
        options: OpenOptions,
    ) -> Result<(Self, LoadReport), FatalError> {
        let objects_dir = objects_dir.as_ref().to_path_buf();
        if !objects_dir.is_dir() {
            return Err(FatalError::MissingObjectsDir(objects_dir));
        }

        let mut issues = Vec::new();
        let mut records: HashMap<ObjectId, Arc<RecordSlot<P::Output>>> = HashMap::new();
        let mut packs: Vec<PackFile> = Vec::new();

        let pack_dir = objects_dir.join("pack");
        if pack_dir.is_dir() {
            let mut pack_paths: Vec<PathBuf> = std::fs::read_dir(&pack_dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "pack"))
                .collect();
            pack_paths.sort();

            for pack_path in pack_paths {
                match PackFile::open(&pack_path) {
                    Ok(pack) => {
                        let pack_index = packs.len();
                        for (offset, oid) in pack.index().entries_by_offset() {
                            records.insert(
                                oid,
                                Arc::new(RecordSlot::new(
                                    ObjectLocation::Pack(pack_path.clone(), offset),
                                    EntrySource::Pack(pack_index, offset),
                                )),
                            );
                        }
                        packs.push(pack);
                    }
                    Err(e) => {
                        let issue = LoadIssue::UnsupportedIndex {
                            pack_path: pack_path.clone(),
                            reason: e.to_string(),
                        };
                        if options.strict {
                            return Err(FatalError::Strict(issue));
                        }
                        issues.push(issue);
                    }
                }
            }
        }

        let loose = LooseObjectStore::open(&objects_dir);
        for result in loose.iter()? {
            match result {
                Ok(oid) => {
                    records.insert(
                        oid,
                        Arc::new(RecordSlot::new(
                            ObjectLocation::Loose(loose.object_path(&oid)),
                            EntrySource::Loose,
                        )),
                    );
                }
                Err(e) => {
                    let issue = LoadIssue::CorruptLoose {
                        dir: objects_dir.clone(),
                        reason: e.to_string(),
                    };
                    if options.strict {
                        return Err(FatalError::Strict(issue));
                    }
                    issues.push(issue);
                }
            }
        }

        let store = ObjectStore {
            records,
            packs,
            loose,
            parser,
            objects_dir,
        };
        Ok((store, LoadReport { issues }))
    }

    /// Resolves one object, doing no more work than the parser asked for.
    ///
    /// Type resolution always happens (it's a header walk, not an inflate).
    /// Payload materialization and parsing only happen if
    /// [`SemanticParser::wants_payload`] says so for this object's type;
    /// otherwise `size` and `parsed` come back `None`.
    pub fn get(&self, oid: &ObjectId) -> Result<ObjectRecord<P::Output>, StoreError> {
        let slot = self.slot(oid)?;
        let obj_type = self.resolve_type(oid)?;

        if !self.parser.wants_payload(obj_type) {
            return Ok(ObjectRecord {
                oid: *oid,
                obj_type,
                location: slot.location.clone(),
                size: None,
                parsed: None,
            });
        }

        let payload = self.payload(oid)?;
        let parsed = self.parsed(oid)?;
        Ok(ObjectRecord {
            oid: *oid,
            obj_type,
            location: slot.location.clone(),
            size: Some(payload.len()),
            parsed: Some(parsed),
        })
    }

    /// Whether `oid` names a known object, loose or packed.
    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.records.contains_key(oid)
    }

    /// Total number of distinct OIDs known to this store.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Every known OID, in arbitrary order.
    pub fn iter_oids(&self) -> impl Iterator<Item = &ObjectId> {
        self.records.keys()
    }

    fn slot(&self, oid: &ObjectId) -> Result<&Arc<RecordSlot<P::Output>>, StoreError> {
        self.records.get(oid).ok_or(StoreError::NotFound(*oid))
    }

    fn resolve_type(&self, oid: &ObjectId) -> Result<ObjectType, StoreError> {
        self.resolve_type_with(oid, &RefCell::new(Vec::new()))
    }

    /// Same as [`Self::resolve_type`], but threading a visiting set through
    /// any `RefDelta` bases this resolves into other packs. `PackFile`
    /// already catches cycles that stay within one pack via its own
    /// offset-keyed visiting set; this one is keyed by OID and guards the
    /// store-level resolver boundary, where a base in pack B can point back
    /// to an OID in pack A that is still mid-resolution. Without it, that
    /// re-entry would call `get_or_init` on an `OnceLock` that is already
    /// initializing, which panics.
    fn resolve_type_with(
        &self,
        oid: &ObjectId,
        visiting: &RefCell<Vec<ObjectId>>,
    ) -> Result<ObjectType, StoreError> {
        let slot = self.slot(oid)?;
        if visiting.borrow().contains(oid) {
            return Err(StoreError::Cycle(*oid));
        }
        visiting.borrow_mut().push(*oid);
        let result = slot
            .resolved_type
            .get_or_init(|| self.resolve_type_uncached(oid, slot, visiting))
            .clone();
        visiting.borrow_mut().pop();
        result
    }

    fn resolve_type_uncached(
        &self,
        oid: &ObjectId,
        slot: &RecordSlot<P::Output>,
        visiting: &RefCell<Vec<ObjectId>>,
    ) -> Result<ObjectType, StoreError> {
        match &slot.source {
            EntrySource::Loose => {
                let (obj_type, _size) = self
                    .loose
                    .read_header(oid)?
                    .ok_or(StoreError::NotFound(*oid))?;
                Ok(obj_type)
            }
            EntrySource::Pack(pack_index, offset) => {
                let pack = &self.packs[*pack_index];
                let resolver_error: RefCell<Option<StoreError>> = RefCell::new(None);
                let resolved = pack.resolve_type_at_offset(*offset, |base_oid| {
                    match self.resolve_type_with(base_oid, visiting) {
                        Ok(obj_type) => Some(obj_type),
                        Err(e) => {
                            *resolver_error.borrow_mut() = Some(e);
                            None
                        }
                    }
                });
                match resolved {
                    Ok(obj_type) => Ok(obj_type),
                    Err(_) if resolver_error.borrow().is_some() => {
                        Err(resolver_error.into_inner().unwrap())
                    }
                    Err(e) => Err(StoreError::from(e)),
                }
            }
        }
    }

    fn payload(&self, oid: &ObjectId) -> Result<Arc<Vec<u8>>, StoreError> {
        self.payload_with(oid, &RefCell::new(Vec::new()))
    }

    /// Same as [`Self::payload`], threading a visiting set through cross-pack
    /// `RefDelta` bases for the same reason [`Self::resolve_type_with`]
    /// does: payload materialization recurses into other packs' resolvers,
    /// and a cross-pack cycle must be rejected before it re-enters this
    /// OID's `OnceLock`.
    fn payload_with(
        &self,
        oid: &ObjectId,
        visiting: &RefCell<Vec<ObjectId>>,
    ) -> Result<Arc<Vec<u8>>, StoreError> {
        let slot = self.slot(oid)?;
        if visiting.borrow().contains(oid) {
            return Err(StoreError::Cycle(*oid));
        }
        visiting.borrow_mut().push(*oid);
        let result = slot
            .payload
            .get_or_init(|| self.payload_uncached(oid, slot, visiting))
            .clone();
        visiting.borrow_mut().pop();
        result
    }

    fn payload_uncached(
        &self,
        oid: &ObjectId,
        slot: &RecordSlot<P::Output>,
        visiting: &RefCell<Vec<ObjectId>>,
    ) -> Result<Arc<Vec<u8>>, StoreError> {
        match &slot.source {
            EntrySource::Loose => {
                let (_obj_type, content) = self
                    .loose
                    .read_raw(oid)?
                    .ok_or(StoreError::NotFound(*oid))?;
                Ok(Arc::new(content))
            }
            EntrySource::Pack(pack_index, offset) => {
                let pack = &self.packs[*pack_index];
                let resolver_error: RefCell<Option<StoreError>> = RefCell::new(None);
                let resolver = |base_oid: &ObjectId| {
                    let obj_type = match self.resolve_type(base_oid) {
                        Ok(t) => t,
                        Err(e) => {
                            *resolver_error.borrow_mut() = Some(e);
                            return None;
                        }
                    };
                    let data = match self.payload_with(base_oid, visiting) {
                        Ok(d) => d,
                        Err(e) => {
                            *resolver_error.borrow_mut() = Some(e);
                            return None;
                        }
                    };
                    Some((obj_type, (*data).clone()))
                };
                let resolved = pack.read_at_offset_with_resolver(*offset, resolver);
                match resolved {
                    Ok(resolved) => Ok(Arc::new(resolved.data)),
                    Err(_) if resolver_error.borrow().is_some() => {
                        Err(resolver_error.into_inner().unwrap())
                    }
                    Err(e) => Err(StoreError::from(e)),
                }
            }
        }
    }

    fn parsed(&self, oid: &ObjectId) -> Result<P::Output, StoreError> {
        let slot = self.slot(oid)?;
        slot.parsed
            .get_or_init(|| {
                let obj_type = self.resolve_type(oid)?;
                let payload = self.payload(oid)?;
                Ok(self.parser.parse(obj_type, &payload, payload.len()))
            })
            .clone()
    }
}
