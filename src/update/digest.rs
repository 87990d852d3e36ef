//! Download integrity check
//!
//! Feeds publish `sha512` as base64 of the raw SHA-512 digest. Artifacts
//! without a digest are accepted as downloaded.

use std::path::Path;

use base64::Engine as _;
use sha2::{Digest, Sha512};
use tokio::io::AsyncReadExt;

use super::UpdateArtifact;
use super::retry::{FailureKind, UpdateFailure};

const READ_CHUNK: usize = 64 * 1024;

/// Base64 SHA-512 of a file's contents
///
/// # Errors
///
/// Returns error if the file can't be read
pub async fn file_sha512(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
}

/// Check a downloaded installer against the artifact's published digest
///
/// A file that does not match is removed.
///
/// # Errors
///
/// `FailureKind::Integrity` on mismatch; the io failure if the file can't be read
pub async fn verify(path: &Path, artifact: &UpdateArtifact) -> Result<(), UpdateFailure> {
    let Some(expected) = artifact.sha512.as_deref().map(str::trim) else {
        tracing::debug!(version = %artifact.version, "no published digest");
        return Ok(());
    };

    let actual = file_sha512(path).await?;
    if actual == expected {
        tracing::debug!(version = %artifact.version, "update digest verified");
        return Ok(());
    }

    tracing::warn!(
        version = %artifact.version,
        expected,
        actual = %actual,
        "update digest mismatch"
    );
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove rejected download");
    }
    Err(UpdateFailure::new(
        FailureKind::Integrity,
        format!("sha512 mismatch for {}", path.display()),
    ))
}
