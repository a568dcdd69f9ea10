//! Content fingerprints used as the import deduplication key.
//!
//! The digest is persisted, so it must not depend on process state or on the
//! toolchain's hasher implementation. It is the leading 64 bits of SHA-256.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::PipelineError;

/// Stable 64-bit fingerprint of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Read `path` and fingerprint its contents.
pub async fn fingerprint_file(path: &Path) -> Result<u64, PipelineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(fingerprint(&bytes))
}

/// SQLite stores integers as signed 64-bit; the bit pattern is kept as-is.
pub fn to_db(hash: u64) -> i64 {
    hash as i64
}

pub fn from_db(value: i64) -> u64 {
    value as u64
}
