//! Verification of downloaded artifacts.
//!
//! A [`SecurityVerifier`] checks an artifact against an expected checksum,
//! the trusted-source allow-list, and the known-signature table, then runs
//! a content scan. Findings are recorded as [`SecurityIssue`] values; only
//! critical findings move the artifact into [`Quarantine`].

mod checksum;
mod digest;
mod issue;
mod policy;
mod quarantine;
mod scan;
mod signatures;
mod sources;
mod verifier;

pub use checksum::{ExpectedChecksum, InvalidChecksum};
pub use digest::{DigestAlgorithm, digests_match, file_digest, verify_checksum};
pub use issue::{SecurityIssue, requires_quarantine};
pub use policy::SecurityPolicy;
pub use quarantine::{Quarantine, QuarantineRecord};
pub use scan::{MAX_ARTIFACT_BYTES, scan_artifact};
pub use signatures::{KnownSignature, KnownSignatures, signature_key};
pub use sources::{TrustedSource, TrustedSources};
pub use verifier::{
    ReportSummary, SecurityCheck, SecurityConfiguration, SecurityReport, SecurityVerifier,
    VerifyRequest,
};
