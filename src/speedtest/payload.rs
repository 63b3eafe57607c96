use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Result, SpeedTestError};

/// Largest slice handed to the OS entropy source in one call.
pub const ENTROPY_CHUNK: usize = 64 * 1024;

/// Fills a fresh `len`-byte buffer from the OS entropy source, one
/// [`ENTROPY_CHUNK`] at a time. Random content defeats compression on the path.
pub fn generate(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    for chunk in buf.chunks_mut(ENTROPY_CHUNK) {
        OsRng
            .try_fill_bytes(chunk)
            .map_err(|e| SpeedTestError::UploadFailed(format!("entropy source failed: {e}")))?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_length_across_chunk_boundary() {
        let buf = generate(200_000).unwrap();
        assert_eq!(buf.len(), 200_000);
        assert_ne!(200_000 % ENTROPY_CHUNK, 0);
    }

    #[test]
    fn test_successive_calls_differ() {
        let a = generate(200_000).unwrap();
        let b = generate(200_000).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tail_is_filled() {
        let buf = generate(ENTROPY_CHUNK * 3 + 512).unwrap();
        let tail = &buf[ENTROPY_CHUNK * 3..];
        assert!(tail.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_zero_length() {
        assert!(generate(0).unwrap().is_empty());
    }
}
