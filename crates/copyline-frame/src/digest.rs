//! SHA-256 end-to-end digest carried in TAIL packets.

use sha2::{Digest, Sha256};

/// Length of a raw SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// SHA-256 of `data` as raw bytes.
pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let hash = Sha256::digest(data);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hash);
    out
}

/// Whether `data` hashes to `expected`.
pub fn verify(data: &[u8], expected: &[u8]) -> bool {
    expected.len() == DIGEST_LEN && sha256(data).as_slice() == expected
}
