//! SHA-256 verification of downloaded artifacts.

use crate::error::DownloadError;

/// Normalise a published digest: accepts `sha256:<hex>` or bare hex.
///
/// Returns `None` for anything that is not 64 hex characters.
#[must_use]
pub fn normalize_digest(digest: &str) -> Option<String> {
    let hex = digest
        .trim()
        .strip_prefix("sha256:")
        .unwrap_or(digest.trim())
        .to_lowercase();
    (hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(hex)
}

/// Compare a computed digest with a published one.
///
/// A published digest that is not a SHA-256 hex string cannot be checked and
/// is skipped with a warning.
pub fn verify_digest(actual: &str, published: &str) -> Result<(), DownloadError> {
    let Some(expected) = normalize_digest(published) else {
        tracing::warn!(published, "published digest is not SHA-256, skipping verification");
        return Ok(());
    };
    if actual.eq_ignore_ascii_case(&expected) {
        tracing::info!(sha256 = %expected, "SHA-256 verification passed");
        Ok(())
    } else {
        Err(DownloadError::ChecksumMismatch {
            expected,
            actual: actual.to_lowercase(),
        })
    }
}
