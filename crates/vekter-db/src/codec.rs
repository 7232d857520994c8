//! Vector serialization and compression.
//!
//! Vectors are stored in the row store as zstd-compressed little-endian
//! IEEE-754 f32 bytes. The codec is deterministic: the same vector at the
//! same level always produces the same byte string, and the round trip is
//! bit-exact.
//!
//! No dimension validation happens here; callers that know `d` validate.

use crate::error::{DbError, DbResult};

/// Lowest accepted compression level (fastest).
pub const MIN_COMPRESSION_LEVEL: i32 = 1;

/// Highest accepted compression level (densest).
pub const MAX_COMPRESSION_LEVEL: i32 = 22;

/// Serialize a 1-D f32 vector to a compressed byte string.
///
/// `level` is the zstd compression strength, `1..=22`. Level 1 is fastest;
/// ingestion paths that write millions of vectors typically stay low.
pub fn serialize(vector: &[f32], level: i32) -> DbResult<Vec<u8>> {
    if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&level) {
        return Err(DbError::codec(format!(
            "compression level {} out of range {}..={}",
            level, MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL
        )));
    }

    let mut raw = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        raw.extend_from_slice(&value.to_le_bytes());
    }

    zstd::stream::encode_all(raw.as_slice(), level)
        .map_err(|e| DbError::codec(format!("zstd compression failed: {}", e)))
}

/// Deserialize a compressed byte string back to a 1-D f32 vector.
pub fn deserialize(bytes: &[u8]) -> DbResult<Vec<f32>> {
    let raw = zstd::stream::decode_all(bytes)
        .map_err(|e| DbError::codec(format!("zstd decompression failed: {}", e)))?;

    if raw.len() % 4 != 0 {
        return Err(DbError::codec(format!(
            "decompressed payload of {} bytes is not a whole number of f32 values",
            raw.len()
        )));
    }

    let mut vector = Vec::with_capacity(raw.len() / 4);
    for chunk in raw.chunks_exact(4) {
        vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_bit_exact() {
        let vector = vec![1.0f32, -2.5, 0.0, f32::MIN_POSITIVE, 1e30, -1e-30];
        for level in [1, 3, 22] {
            let bytes = serialize(&vector, level).unwrap();
            let back = deserialize(&bytes).unwrap();
            assert_eq!(back.len(), vector.len());
            for (a, b) in vector.iter().zip(back.iter()) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }

    #[test]
    fn test_round_trip_nan_payload() {
        let vector = vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY];
        let bytes = serialize(&vector, 3).unwrap();
        let back = deserialize(&bytes).unwrap();
        for (a, b) in vector.iter().zip(back.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_empty_vector() {
        let bytes = serialize(&[], 1).unwrap();
        let back = deserialize(&bytes).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_level_out_of_range() {
        assert!(serialize(&[1.0], 0).is_err());
        assert!(serialize(&[1.0], 23).is_err());
    }

    #[test]
    fn test_deterministic() {
        let vector = vec![0.25f32; 128];
        let a = serialize(&vector, 5).unwrap();
        let b = serialize(&vector, 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_garbage_input_rejected() {
        assert!(deserialize(b"definitely not zstd").is_err());
    }
}
