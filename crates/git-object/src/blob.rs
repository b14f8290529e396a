use crate::ObjectError;

/// A git blob — raw file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Parse blob content. A blob is simply its raw bytes.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        Ok(Self {
            data: content.to_vec(),
        })
    }
}
