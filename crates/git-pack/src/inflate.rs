//! Zlib inflation of a pack entry's compressed payload slice.

use std::io::Read;

use flate2::bufread::ZlibDecoder;

use crate::PackError;

/// Inflates `compressed` to exactly `expected_len` bytes.
///
/// Pack entries and loose objects both carry their own uncompressed size
/// out of band, so this stops reading once that many bytes have come out
/// rather than trusting the deflate stream's own end marker, and treats
/// a short read as corruption instead of silently returning less.
pub fn inflate_exact(compressed: &[u8], expected_len: usize) -> Result<Vec<u8>, PackError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut buf = vec![0u8; expected_len];
    let mut filled = 0;
    while filled < buf.len() {
        let n = decoder
            .read(&mut buf[filled..])
            .map_err(|_| PackError::CorruptPack("zlib inflate failed".into()))?;
        if n == 0 {
            return Err(PackError::CorruptPack(format!(
                "inflate produced {filled} of {expected_len} expected bytes"
            )));
        }
        filled += n;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn inflates_exact_length() {
        let content = b"a sample object payload";
        let compressed = zlib(content);
        let out = inflate_exact(&compressed, content.len()).unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn short_stream_errors() {
        let compressed = zlib(b"short");
        assert!(inflate_exact(&compressed, 1000).is_err());
    }

    #[test]
    fn garbage_input_errors() {
        assert!(inflate_exact(b"not zlib data", 10).is_err());
    }
}
