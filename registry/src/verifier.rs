//! Package checksum verification (SHA-256)

use sdk::errors::EngineError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Strip an optional `sha256:` prefix and normalise to lowercase hex
fn normalize(expected: &str) -> String {
    expected
        .trim()
        .strip_prefix("sha256:")
        .unwrap_or(expected.trim())
        .to_ascii_lowercase()
}

/// Compute the SHA-256 hash of `data` and return hex string
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that the SHA-256 hash of `data` matches `expected`
///
/// An empty `expected` means the package carries no checksum and is accepted.
pub fn verify_hash(data: &[u8], expected: &str, label: &str) -> Result<(), EngineError> {
    if expected.trim().is_empty() {
        return Ok(());
    }
    let expected = normalize(expected);
    let computed = compute_hash(data);

    if computed != expected {
        tracing::error!(
            "Checksum mismatch for {}: expected {}, got {}",
            label,
            expected,
            computed
        );
        return Err(EngineError::HashMismatch(label.to_string()));
    }

    Ok(())
}

/// Verify an artifact already on disk
pub fn verify_file(path: &Path, expected: &str) -> Result<(), EngineError> {
    if !path.exists() {
        return Err(EngineError::FileNotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path)?;
    verify_hash(&data, expected, &path.display().to_string())
}
