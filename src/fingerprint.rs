//! Content fingerprinting.
//!
//! A fingerprint is the lowercase hex SHA-256 of a byte sequence. It is the
//! change-detection key for document versions, not a security primitive.

use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// Compute the fingerprint of `bytes`.
pub fn compute(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Short prefix of a fingerprint, used to build artifact directory names.
pub fn short(checksum: &str) -> &str {
    let end = checksum.len().min(12);
    &checksum[..end]
}
