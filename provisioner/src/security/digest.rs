//! Streaming file digests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_CHUNK: usize = 8192;

/// Digest algorithms accepted for checksums and signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256, 64 hex characters.
    #[default]
    Sha256,
    /// SHA-512, 128 hex characters.
    Sha512,
}

impl DigestAlgorithm {
    /// Length of a hex-encoded digest for this algorithm.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Lowercase algorithm name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the lowercase hex digest of the file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn file_digest(path: &Path, algorithm: DigestAlgorithm) -> io::Result<String> {
    let mut file = File::open(path)?;
    match algorithm {
        DigestAlgorithm::Sha256 => hash_reader::<Sha256>(&mut file),
        DigestAlgorithm::Sha512 => hash_reader::<Sha512>(&mut file),
    }
}

fn hash_reader<D: Digest>(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

/// Compare two hex digests, ignoring case and surrounding whitespace.
#[must_use]
pub fn digests_match(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

/// Report whether the file at `path` hashes to `expected`.
///
/// Unreadable files never match.
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::security::{DigestAlgorithm, file_digest, verify_checksum};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("tool");
/// std::fs::write(&path, b"abc").unwrap();
/// let digest = file_digest(&path, DigestAlgorithm::Sha256).unwrap();
///
/// assert!(verify_checksum(&path, &digest, DigestAlgorithm::Sha256));
/// assert!(!verify_checksum(&path, &format!("{digest}x"), DigestAlgorithm::Sha256));
/// ```
#[must_use]
pub fn verify_checksum(path: &Path, expected: &str, algorithm: DigestAlgorithm) -> bool {
    match file_digest(path, algorithm) {
        Ok(actual) => digests_match(&actual, expected),
        Err(err) => {
            log::warn!("checksum of {} could not be computed: {err}", path.display());
            false
        }
    }
}
