//! Known-signature table.
//!
//! A "signature" here is a published digest compared for equality with the
//! artifact's digest. No asymmetric verification takes place; the
//! `public_key` field is carried for configuration round-trips only.

use super::digest::{DigestAlgorithm, digests_match, file_digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A published digest for one artifact release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownSignature {
    /// Artifact name.
    pub name: String,
    /// Release version; `None` matches lookups without a version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Algorithm the digest was computed with.
    pub algorithm: DigestAlgorithm,
    /// Hex digest the artifact must hash to.
    pub signature: String,
    /// Publisher key, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Where the signature was obtained.
    pub source: String,
    /// When the signature was recorded.
    pub timestamp: DateTime<Utc>,
}

impl KnownSignature {
    /// The lookup key for this signature.
    #[must_use]
    pub fn key(&self) -> String {
        signature_key(&self.name, self.version.as_deref())
    }

    /// Report whether the file at `path` matches this signature.
    ///
    /// Unreadable files never match.
    #[must_use]
    pub fn matches_file(&self, path: &Path) -> bool {
        match file_digest(path, self.algorithm) {
            Ok(actual) => digests_match(&actual, &self.signature),
            Err(err) => {
                log::warn!("signature digest of {} failed: {err}", path.display());
                false
            }
        }
    }
}

/// Build the `name@version` key, or just `name` without a version.
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::security::signature_key;
///
/// assert_eq!(signature_key("ffmpeg", Some("7.0")), "ffmpeg@7.0");
/// assert_eq!(signature_key("ffmpeg", None), "ffmpeg");
/// ```
#[must_use]
pub fn signature_key(name: &str, version: Option<&str>) -> String {
    match version {
        Some(version) if !version.is_empty() => format!("{name}@{version}"),
        _ => name.to_owned(),
    }
}

/// Signatures keyed by [`signature_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownSignatures {
    entries: BTreeMap<String, KnownSignature>,
}

impl KnownSignatures {
    /// Insert or replace a signature.
    pub fn add(&mut self, signature: KnownSignature) {
        self.entries.insert(signature.key(), signature);
    }

    /// Look up the signature for `name` and `version`.
    #[must_use]
    pub fn get(&self, name: &str, version: Option<&str>) -> Option<&KnownSignature> {
        self.entries.get(&signature_key(name, version))
    }

    /// Number of signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Report whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot keyed by signature key.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, KnownSignature> {
        self.entries.clone()
    }

    /// Replace every entry.
    pub fn replace_all(&mut self, entries: BTreeMap<String, KnownSignature>) {
        self.entries = entries;
    }
}
