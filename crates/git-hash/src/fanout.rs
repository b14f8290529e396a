use crate::HashError;

/// Fan-out table mapping first byte to cumulative count.
///
/// Used in pack index files for fast object lookup. Each of the 256 entries
/// contains the cumulative number of objects whose first hash byte is ≤ the
/// entry index. Read-only: this reader never writes a pack index, so there
/// is no encoder here, only the decoder `git_pack::index::PackIndex::open`
/// uses.
#[derive(Debug)]
pub struct FanoutTable {
    table: [u32; 256],
}

impl FanoutTable {
    /// Get the index range for OIDs whose first byte equals `first_byte`.
    pub fn range(&self, first_byte: u8) -> std::ops::Range<usize> {
        let end = self.table[first_byte as usize] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.table[(first_byte - 1) as usize] as usize
        };
        start..end
    }

    /// Total number of objects tracked by this fan-out table.
    pub fn total(&self) -> u32 {
        self.table[255]
    }

    /// Read from binary format (pack index): 256 big-endian u32 values.
    pub fn from_bytes(data: &[u8]) -> Result<Self, HashError> {
        if data.len() < 1024 {
            return Err(HashError::InvalidHashLength {
                expected: 1024,
                actual: data.len(),
            });
        }
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let offset = i * 4;
            *entry = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
        }
        Self::validate(&table)?;
        Ok(Self { table })
    }

    fn validate(table: &[u32; 256]) -> Result<(), HashError> {
        // Cumulative counts must be non-decreasing.
        for i in 1..256 {
            if table[i] < table[i - 1] {
                return Err(HashError::InvalidHashLength {
                    expected: table[i - 1] as usize,
                    actual: table[i] as usize,
                });
            }
        }
        Ok(())
    }
}
