//! The security verifier: checks an artifact and quarantines it when a
//! critical finding turns up.

use super::checksum::ExpectedChecksum;
use super::digest::verify_checksum;
use super::issue::{SecurityIssue, requires_quarantine};
use super::quarantine::Quarantine;
use super::scan::scan_artifact;
use super::signatures::{KnownSignature, KnownSignatures, signature_key};
use super::sources::{TrustedSource, TrustedSources};
use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const PASS_RATE_THRESHOLD: f64 = 0.8;
const MIN_TRUSTED_SOURCES: usize = 3;

/// Inputs for one verification.
#[derive(Debug, Clone, Copy)]
pub struct VerifyRequest<'a> {
    /// Artifact name, also the quarantine name.
    pub name: &'a str,
    /// The artifact on disk.
    pub path: &'a Path,
    /// Digest the artifact must hash to, when known.
    pub expected_checksum: Option<&'a ExpectedChecksum>,
    /// URL the artifact was fetched from, when known.
    pub source: Option<&'a str>,
    /// Release version, when known.
    pub version: Option<&'a str>,
}

impl<'a> VerifyRequest<'a> {
    /// A request with no checksum, source, or version.
    #[must_use]
    pub const fn new(name: &'a str, path: &'a Path) -> Self {
        Self {
            name,
            path,
            expected_checksum: None,
            source: None,
            version: None,
        }
    }

    /// Require the artifact to match `checksum`.
    #[must_use]
    pub const fn with_checksum(mut self, checksum: Option<&'a ExpectedChecksum>) -> Self {
        self.expected_checksum = checksum;
        self
    }

    /// Declare where the artifact came from.
    #[must_use]
    pub const fn with_source(mut self, source: &'a str) -> Self {
        self.source = Some(source);
        self
    }

    /// Declare the artifact's version.
    #[must_use]
    pub const fn with_version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }
}

/// The outcome of verifying one artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCheck {
    /// Artifact name.
    pub name: String,
    /// Artifact version, when one was declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// The artifact path as verified.
    pub path: PathBuf,
    /// `true` when the checksum matched or none was expected.
    pub checksum_valid: bool,
    /// `true` only when a known signature matched.
    pub signature_valid: bool,
    /// `true` only when a declared source is trusted.
    pub source_valid: bool,
    /// Whether the artifact was moved into quarantine.
    pub quarantined: bool,
    /// Every finding, in check order.
    pub security_issues: Vec<SecurityIssue>,
    /// When the check ran.
    pub last_checked: DateTime<Utc>,
}

impl SecurityCheck {
    fn new(request: &VerifyRequest<'_>) -> Self {
        Self {
            name: request.name.to_owned(),
            version: request.version.map(str::to_owned),
            path: request.path.to_path_buf(),
            checksum_valid: false,
            signature_valid: false,
            source_valid: false,
            quarantined: false,
            security_issues: Vec::new(),
            last_checked: Utc::now(),
        }
    }

    /// Findings rendered as their stable strings.
    #[must_use]
    pub fn issue_strings(&self) -> Vec<String> {
        self.security_issues.iter().map(ToString::to_string).collect()
    }

    /// Every check passed and nothing was flagged.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checksum_valid
            && self.signature_valid
            && self.source_valid
            && self.security_issues.is_empty()
    }
}

/// Aggregate counts for [`SecurityReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Checks on record.
    pub total_checks: usize,
    /// Checks that passed.
    pub passed_checks: usize,
    /// Checks that did not pass.
    pub failed_checks: usize,
    /// Checks that ended in quarantine.
    pub quarantined_dependencies: usize,
}

/// Snapshot of the verifier's state for hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    /// Aggregate counts.
    pub summary: ReportSummary,
    /// The allow-list.
    pub trusted_sources: Vec<TrustedSource>,
    /// Every check on record.
    pub security_checks: Vec<SecurityCheck>,
    /// Suggested follow-ups.
    pub recommendations: Vec<String>,
}

/// Exportable verifier configuration. Absent sections are left untouched on
/// import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfiguration {
    /// Allow-list keyed by domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_sources: Option<BTreeMap<String, TrustedSource>>,
    /// Known signatures keyed by `name@version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_signatures: Option<BTreeMap<String, KnownSignature>>,
}

/// Verifies artifacts and owns the quarantine.
///
/// All state sits behind mutexes; a verifier can be shared between threads.
#[derive(Debug)]
pub struct SecurityVerifier {
    sources: Mutex<TrustedSources>,
    signatures: Mutex<KnownSignatures>,
    checks: Mutex<BTreeMap<String, SecurityCheck>>,
    quarantine: Quarantine,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SecurityVerifier {
    /// A verifier with the built-in allow-list, an empty signature table,
    /// and its quarantine at `quarantine_dir`.
    #[must_use]
    pub fn new(quarantine_dir: PathBuf) -> Self {
        Self {
            sources: Mutex::new(TrustedSources::with_defaults()),
            signatures: Mutex::new(KnownSignatures::default()),
            checks: Mutex::new(BTreeMap::new()),
            quarantine: Quarantine::new(quarantine_dir),
        }
    }

    /// Create the quarantine directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Security`] if the directory cannot be
    /// created.
    pub fn initialize(&self) -> Result<()> {
        std::fs::create_dir_all(self.quarantine.dir()).map_err(|err| ProvisionError::Security {
            reason: format!(
                "failed to create quarantine directory {}: {err}",
                self.quarantine.dir().display()
            ),
        })?;
        log::debug!(
            "security verifier ready: {} trusted sources, {} known signatures",
            lock(&self.sources).len(),
            lock(&self.signatures).len()
        );
        Ok(())
    }

    /// Verify one artifact, quarantining it on a critical finding.
    ///
    /// Findings are data, not errors; the returned check records them.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Security`] only when quarantining fails.
    pub fn verify(&self, request: &VerifyRequest<'_>) -> Result<SecurityCheck> {
        log::info!("verifying {} at {}", request.name, request.path.display());
        let mut check = SecurityCheck::new(request);
        let key = signature_key(request.name, request.version);

        if !request.path.exists() {
            check.security_issues.push(SecurityIssue::FileNotFound);
            self.record(key, &check);
            return Ok(check);
        }

        check.checksum_valid = match request.expected_checksum {
            Some(expected) => verify_checksum(request.path, expected.hex(), expected.algorithm()),
            None => true,
        };
        if !check.checksum_valid {
            check.security_issues.push(SecurityIssue::ChecksumMismatch);
        }

        if let Some(source) = request.source {
            check.source_valid = lock(&self.sources).is_trusted_url(source);
            if !check.source_valid {
                check
                    .security_issues
                    .push(SecurityIssue::UntrustedSource(source.to_owned()));
            }
        }

        let known = lock(&self.signatures)
            .get(request.name, request.version)
            .cloned();
        match known {
            Some(signature) => {
                check.signature_valid = signature.matches_file(request.path);
                if !check.signature_valid {
                    check.security_issues.push(SecurityIssue::SignatureMismatch);
                }
            }
            None => check.security_issues.push(SecurityIssue::NoKnownSignature),
        }

        check.security_issues.extend(scan_artifact(request.path));

        if requires_quarantine(&check.security_issues) {
            self.quarantine
                .isolate(request.path, request.name, &check.issue_strings())?;
            check.quarantined = true;
        }

        log::info!(
            "verified {}: checksum={} signature={} source={} quarantined={} issues={}",
            request.name,
            check.checksum_valid,
            check.signature_valid,
            check.source_valid,
            check.quarantined,
            check.security_issues.len()
        );
        self.record(key, &check);
        Ok(check)
    }

    fn record(&self, key: String, check: &SecurityCheck) {
        lock(&self.checks).insert(key, check.clone());
    }

    /// Report whether `url` points at a trusted host.
    #[must_use]
    pub fn is_trusted_source(&self, url: &str) -> bool {
        lock(&self.sources).is_trusted_url(url)
    }

    /// Add or replace a trusted source.
    pub fn add_trusted_source(&self, source: TrustedSource) {
        lock(&self.sources).add(source);
    }

    /// Remove a trusted source. Returns `false` if it was not present.
    pub fn remove_trusted_source(&self, domain: &str) -> bool {
        lock(&self.sources).remove(domain).is_some()
    }

    /// Enable or disable a trusted source. Returns `false` if unknown.
    pub fn set_source_enabled(&self, domain: &str, enabled: bool) -> bool {
        lock(&self.sources).set_enabled(domain, enabled)
    }

    /// Add or replace a known signature.
    pub fn add_known_signature(&self, signature: KnownSignature) {
        log::debug!("recording signature for {}", signature.key());
        lock(&self.signatures).add(signature);
    }

    /// The latest check for `name` and `version`.
    #[must_use]
    pub fn security_check(&self, name: &str, version: Option<&str>) -> Option<SecurityCheck> {
        lock(&self.checks).get(&signature_key(name, version)).cloned()
    }

    /// Every check on record, in key order.
    #[must_use]
    pub fn all_security_checks(&self) -> Vec<SecurityCheck> {
        lock(&self.checks).values().cloned().collect()
    }

    /// The quarantine store.
    #[must_use]
    pub fn quarantine(&self) -> &Quarantine {
        &self.quarantine
    }

    /// Names of quarantined artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Security`] if the directory is unreadable.
    pub fn quarantined(&self) -> Result<Vec<String>> {
        self.quarantine.list()
    }

    /// Delete a quarantined artifact and its sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Security`] if removal fails.
    pub fn release(&self, name: &str) -> Result<()> {
        self.quarantine.release(name)
    }

    /// Summarise the verifier's state.
    #[must_use]
    pub fn report(&self) -> SecurityReport {
        let checks = self.all_security_checks();
        let trusted_sources: Vec<_> = lock(&self.sources).iter().cloned().collect();
        let passed = checks.iter().filter(|check| check.passed()).count();
        let quarantined = checks.iter().filter(|check| check.quarantined).count();

        let mut recommendations = Vec::new();
        if !checks.is_empty() && pass_rate(passed, checks.len()) < PASS_RATE_THRESHOLD {
            recommendations.push("Consider updating security verification procedures".to_owned());
        }
        if quarantined > 0 {
            recommendations.push("Review and address quarantined dependencies".to_owned());
        }
        if trusted_sources.len() < MIN_TRUSTED_SOURCES {
            recommendations.push(
                "Consider adding more trusted sources for better verification coverage".to_owned(),
            );
        }

        SecurityReport {
            summary: ReportSummary {
                total_checks: checks.len(),
                passed_checks: passed,
                failed_checks: checks.len() - passed,
                quarantined_dependencies: quarantined,
            },
            trusted_sources,
            security_checks: checks,
            recommendations,
        }
    }

    /// Export the allow-list and signature table.
    #[must_use]
    pub fn export_configuration(&self) -> SecurityConfiguration {
        SecurityConfiguration {
            trusted_sources: Some(lock(&self.sources).to_map()),
            known_signatures: Some(lock(&self.signatures).to_map()),
        }
    }

    /// Replace the sections present in `config`.
    pub fn import_configuration(&self, config: SecurityConfiguration) {
        if let Some(sources) = config.trusted_sources {
            lock(&self.sources).replace_all(sources);
        }
        if let Some(signatures) = config.known_signatures {
            lock(&self.signatures).replace_all(signatures);
        }
        log::info!("security configuration imported");
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "check counts are far below f64 precision limits"
)]
fn pass_rate(passed: usize, total: usize) -> f64 {
    passed as f64 / total as f64
}

#[cfg(test)]
#[path = "verifier_tests.rs"]
mod tests;
