use bstr::{BStr, BString, ByteSlice};
use git_hash::ObjectId;
use git_utils::date::Signature;

use crate::{ObjectError, ObjectType};

/// A git annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// OID of the tagged object.
    pub target: ObjectId,
    /// Type of the tagged object.
    pub target_type: ObjectType,
    /// Tag name.
    pub tag_name: BString,
    /// Tagger identity and timestamp (optional for some old tags).
    pub tagger: Option<Signature>,
    /// Tag message.
    pub message: BString,
    /// Optional GPG signature.
    pub gpgsig: Option<BString>,
}

impl Tag {
    /// Parse tag content from raw bytes (no object header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut target: Option<ObjectId> = None;
        let mut target_type: Option<ObjectType> = None;
        let mut tag_name: Option<BString> = None;
        let mut tagger: Option<Signature> = None;
        let mut gpgsig: Option<BString> = None;

        let mut pos = 0;
        let data = content;

        // Parse headers.
        loop {
            if pos >= data.len() {
                break;
            }

            if data[pos] == b'\n' {
                pos += 1;
                break;
            }

            let line_end = data[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| p + pos)
                .unwrap_or(data.len());

            let line = &data[pos..line_end];

            if let Some(space_pos) = line.iter().position(|&b| b == b' ') {
                let key = &line[..space_pos];
                let value = &line[space_pos + 1..];

                match key {
                    b"object" => {
                        let hex = std::str::from_utf8(value).map_err(|_| {
                            ObjectError::InvalidHeader("non-UTF8 target OID".into())
                        })?;
                        target = Some(ObjectId::from_hex(hex)?);
                    }
                    b"type" => {
                        target_type = Some(ObjectType::from_bytes(value)?);
                    }
                    b"tag" => {
                        tag_name = Some(BString::from(value));
                    }
                    b"tagger" => {
                        tagger = Some(
                            Signature::parse(BStr::new(value))
                                .map_err(|e| ObjectError::InvalidSignature(e.to_string()))?,
                        );
                    }
                    _ => {
                        // Skip unknown headers.
                    }
                }
            }

            pos = line_end + 1;
        }

        // Remaining bytes are the message. Check for GPG signature.
        let remaining = &data[pos..];
        let message;

        // GPG signatures in tags appear at the end of the message, starting with
        // "-----BEGIN PGP SIGNATURE-----".
        if let Some(sig_start) = remaining.find(b"-----BEGIN PGP SIGNATURE-----") {
            message = BString::from(&remaining[..sig_start]);
            gpgsig = Some(BString::from(&remaining[sig_start..]));
        } else if let Some(sig_start) = remaining.find(b"-----BEGIN SSH SIGNATURE-----") {
            message = BString::from(&remaining[..sig_start]);
            gpgsig = Some(BString::from(&remaining[sig_start..]));
        } else {
            message = BString::from(remaining);
        }

        let target = target.ok_or(ObjectError::MissingTagField { field: "object" })?;
        let target_type = target_type.ok_or(ObjectError::MissingTagField { field: "type" })?;
        let tag_name = tag_name.ok_or(ObjectError::MissingTagField { field: "tag" })?;

        Ok(Self {
            target,
            target_type,
            tag_name,
            tagger,
            message,
            gpgsig,
        })
    }
}
