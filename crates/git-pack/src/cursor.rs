//! Positioned read-only view over a byte slice (mmap or in-memory).
//!
//! Every read advances the cursor and fails with `Truncated` rather than
//! panicking when the slice runs out; callers never get a short read.

use crate::PackError;

pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, absolute: usize) -> Result<(), PackError> {
        if absolute > self.data.len() {
            return Err(PackError::Truncated);
        }
        self.pos = absolute;
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8, PackError> {
        self.data.get(self.pos).copied().ok_or(PackError::Truncated)
    }

    pub fn read_u8(&mut self) -> Result<u8, PackError> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u32_be(&mut self) -> Result<u32, PackError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], PackError> {
        let end = self.pos.checked_add(n).ok_or(PackError::Truncated)?;
        if end > self.data.len() {
            return Err(PackError::Truncated);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}
