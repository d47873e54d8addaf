//! Security findings recorded against an artifact.

use serde::{Serialize, Serializer};
use std::fmt;

/// One finding from verification.
///
/// The display strings are stable; hosts and the quarantine sidecar rely
/// on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecurityIssue {
    /// The artifact path does not exist.
    FileNotFound,
    /// The artifact does not hash to the expected checksum.
    ChecksumMismatch,
    /// The declared source is not on the allow-list.
    UntrustedSource(String),
    /// The artifact does not match its known signature.
    SignatureMismatch,
    /// No known signature exists for the artifact.
    NoKnownSignature,
    /// A suspicious byte pattern was found.
    SuspiciousPattern(String),
    /// The artifact exceeds the size limit.
    OversizedFile,
    /// The artifact cannot be opened for reading.
    NotReadable,
    /// The content scan itself failed.
    ScanFailed(String),
}

impl SecurityIssue {
    /// Report whether this finding alone warrants quarantine.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch | Self::SignatureMismatch | Self::SuspiciousPattern(_)
        )
    }
}

impl fmt::Display for SecurityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound => f.write_str("Dependency file not found"),
            Self::ChecksumMismatch => f.write_str("Checksum verification failed"),
            Self::UntrustedSource(source) => write!(f, "Untrusted source: {source}"),
            Self::SignatureMismatch => f.write_str("Signature verification failed"),
            Self::NoKnownSignature => f.write_str("No known signature for verification"),
            Self::SuspiciousPattern(pattern) => {
                write!(f, "Suspicious pattern detected: {pattern}")
            }
            Self::OversizedFile => f.write_str("File size exceeds reasonable limits"),
            Self::NotReadable => f.write_str("File is not readable"),
            Self::ScanFailed(reason) => write!(f, "Security scan failed: {reason}"),
        }
    }
}

impl Serialize for SecurityIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Report whether `issues` contain a quarantine-triggering finding.
#[must_use]
pub fn requires_quarantine(issues: &[SecurityIssue]) -> bool {
    issues.iter().any(SecurityIssue::is_critical)
}
