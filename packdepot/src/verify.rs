//! SHA-256 verification of downloaded packs.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{PackError, PackResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate the SHA-256 checksum of a file.
///
/// # Arguments
///
/// * `path` - Path to the file to checksum
///
/// # Returns
///
/// The lowercase hexadecimal SHA-256 digest of the file contents.
///
/// # Errors
///
/// Returns [`PackError::Unknown`] if the file cannot be read.
pub fn calculate_file_checksum(path: &Path) -> PackResult<String> {
    let mut file = File::open(path).map_err(|e| PackError::io("open", path, e))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| PackError::io("read", path, e))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify that a file matches an expected checksum, ignoring hex case.
///
/// # Arguments
///
/// * `path` - Path to the completed download
/// * `expected` - Expected SHA-256 digest, hex encoded
///
/// # Errors
///
/// Returns [`PackError::VerificationFailed`] on a mismatch, or the read
/// error from [`calculate_file_checksum`].
pub fn verify_checksum(path: &Path, expected: &str) -> PackResult<()> {
    let actual = calculate_file_checksum(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        warn!(path = %path.display(), expected, actual = %actual, "Checksum mismatch");
        return Err(PackError::VerificationFailed {
            expected: expected.to_string(),
            actual,
        });
    }
    debug!(path = %path.display(), "Checksum verified");
    Ok(())
}

/// Verification step of the download pipeline.
pub trait PackVerifier: Send + Sync {
    /// Check the completed download at `path` against `expected`.
    fn verify(&self, path: &Path, expected: &str) -> PackResult<()>;
}

/// Streaming SHA-256 verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Verifier;

impl PackVerifier for Sha256Verifier {
    fn verify(&self, path: &Path, expected: &str) -> PackResult<()> {
        verify_checksum(path, expected)
    }
}
