use std::fs;
use std::io::Read;

use flate2::read::ZlibDecoder;
use git_object::header;
use git_object::{Object, ObjectType};

use crate::{LooseError, LooseObjectStore};

/// Starting size for the header peek buffer; doubled on each retry.
const HEADER_PEEK_START: usize = 32;
/// Hard cap on how large the header peek buffer is allowed to grow.
const HEADER_PEEK_CAP: usize = 8192;

impl LooseObjectStore {
    /// Check if a loose object exists.
    pub fn contains(&self, oid: &git_hash::ObjectId) -> bool {
        self.object_path(oid).is_file()
    }

    /// Read a loose object by OID.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    /// Returns `Err` if the object exists but is corrupt.
    pub fn read(&self, oid: &git_hash::ObjectId) -> Result<Option<Object>, LooseError> {
        let path = self.object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LooseError::Io(e)),
        };

        let decompressed = decompress_all(&compressed, oid)?;
        let obj = Object::parse(&decompressed)?;
        Ok(Some(obj))
    }

    /// Read the decompressed content bytes and type without building a
    /// parsed [`Object`]. For callers that interpret payloads themselves
    /// (e.g. via a `SemanticParser`) rather than wanting this crate's own
    /// object model.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    pub fn read_raw(
        &self,
        oid: &git_hash::ObjectId,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, LooseError> {
        let path = self.object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LooseError::Io(e)),
        };

        let decompressed = decompress_all(&compressed, oid)?;
        let (obj_type, content_size, header_len) = header::parse_header(&decompressed)?;
        let content = &decompressed[header_len..];
        if content.len() < content_size {
            return Err(LooseError::Corrupt {
                oid: oid.to_hex(),
                reason: format!(
                    "truncated content: expected {content_size} bytes, got {}",
                    content.len()
                ),
            });
        }
        Ok(Some((obj_type, content[..content_size].to_vec())))
    }

    /// Read just the header (type + size) without decompressing the full content.
    ///
    /// Retries with a growing peek buffer (32, 64, 128, ... up to a cap) when
    /// the header's null terminator hasn't shown up yet, rather than assuming
    /// a fixed size is always enough.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    pub fn read_header(
        &self,
        oid: &git_hash::ObjectId,
    ) -> Result<Option<(ObjectType, usize)>, LooseError> {
        let path = self.object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LooseError::Io(e)),
        };

        let mut peek_size = HEADER_PEEK_START;
        loop {
            let mut decoder = ZlibDecoder::new(&compressed[..]);
            let mut buf = vec![0u8; peek_size];
            let mut filled = 0;
            let mut eof = false;

            while filled < buf.len() {
                let n = decoder
                    .read(&mut buf[filled..])
                    .map_err(|e| LooseError::Decompress {
                        oid: oid.to_hex(),
                        source: e,
                    })?;
                if n == 0 {
                    eof = true;
                    break;
                }
                filled += n;
            }

            if buf[..filled].contains(&0) {
                let (obj_type, content_size, _header_len) = header::parse_header(&buf[..filled])?;
                return Ok(Some((obj_type, content_size)));
            }

            if eof {
                return Err(LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: "unexpected EOF before header null terminator".into(),
                });
            }

            if peek_size >= HEADER_PEEK_CAP {
                return Err(LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: format!("header exceeds {HEADER_PEEK_CAP} bytes"),
                });
            }
            peek_size *= 2;
        }
    }
}

/// Zlib-decompress the full contents of a loose object file.
fn decompress_all(compressed: &[u8], oid: &git_hash::ObjectId) -> Result<Vec<u8>, LooseError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| LooseError::Decompress {
            oid: oid.to_hex(),
            source: e,
        })?;
    Ok(decompressed)
}
