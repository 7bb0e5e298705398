use data_encoding::BASE64;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ring::rand::{SecureRandom, SystemRandom};
use sha3::{Digest, Sha3_256};

use crate::error::{Result, TangleError};
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC time as whole seconds since the epoch
pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| TangleError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    // Ensure the timestamp fits in i64
    if duration > i64::MAX as u64 {
        return Err(TangleError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

/// SHA3-256 digest of the input, rendered as base64 with no newlines.
///
/// Every hash in the tangle is this fixed-shape printable string.
pub fn sha3_256_base64(data: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    BASE64.encode(digest.as_slice())
}

pub fn base64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn base64_decode(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data.as_bytes())
        .map_err(|e| TangleError::Protocol(format!("Invalid base64 encoding: {e}")))
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| TangleError::Io(format!("Compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| TangleError::Io(format!("Compression failed: {e}")))
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TangleError::Io(format!("Decompression failed: {e}")))?;
    Ok(out)
}

/// Random 64-bit word from the system CSPRNG, used to seed mining nonces
pub fn random_u64() -> Result<u64> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 8];
    rng.fill(&mut bytes)
        .map_err(|e| TangleError::Crypto(format!("Failed to gather randomness: {e}")))?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_newline_free() {
        let a = sha3_256_base64(b"tangle");
        let b = sha3_256_base64(b"tangle");
        assert_eq!(a, b);
        assert!(!a.contains('\n'));
        // 32 bytes of digest encode to 44 base64 characters
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_hash_differs_on_input() {
        assert_ne!(sha3_256_base64(b"a"), sha3_256_base64(b"b"));
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = b"some reasonably compressible data data data data".to_vec();
        let compressed = gzip(&data).unwrap();
        let decompressed = gunzip(&compressed).unwrap();
        assert_eq!(data, decompressed);
    }

    #[test]
    fn test_base64_round_trip() {
        let data = vec![0u8, 1, 2, 254, 255];
        let encoded = base64_encode(&data);
        assert_eq!(base64_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_base64_rejects_garbage() {
        assert!(base64_decode("not base64!!").is_err());
    }
}
