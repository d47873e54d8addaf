//! Lightweight content scan.
//!
//! Every artifact is checked for size and readability. Windows executables
//! are additionally searched for a few shell and interpreter strings. Hits
//! are findings, not verdicts.

use super::issue::SecurityIssue;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

/// Artifacts larger than this are flagged.
pub const MAX_ARTIFACT_BYTES: u64 = 500 * 1024 * 1024;

const SUSPICIOUS_PATTERNS: [&str; 3] = ["cmd.exe", "powershell", "eval("];
const SCAN_CHUNK: usize = 64 * 1024;

/// Scan the artifact at `path`, returning every finding.
#[must_use]
pub fn scan_artifact(path: &Path) -> Vec<SecurityIssue> {
    let mut issues = Vec::new();
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            issues.push(SecurityIssue::ScanFailed(err.to_string()));
            return issues;
        }
    };
    if size > MAX_ARTIFACT_BYTES {
        issues.push(SecurityIssue::OversizedFile);
    }
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(_) => {
            issues.push(SecurityIssue::NotReadable);
            return issues;
        }
    };
    if is_windows_executable(path) {
        match find_patterns(&mut file, &SUSPICIOUS_PATTERNS) {
            Ok(found) => issues.extend(
                found
                    .into_iter()
                    .map(|pattern| SecurityIssue::SuspiciousPattern(pattern.to_owned())),
            ),
            Err(err) => issues.push(SecurityIssue::ScanFailed(err.to_string())),
        }
    }
    issues
}

fn is_windows_executable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}

/// Return the patterns that occur anywhere in `reader`, in pattern order.
///
/// Reads in chunks and carries an overlap so matches spanning a chunk
/// boundary are found.
fn find_patterns<'p>(reader: &mut impl Read, patterns: &[&'p str]) -> io::Result<Vec<&'p str>> {
    let overlap = patterns.iter().map(|p| p.len()).max().unwrap_or(1).saturating_sub(1);
    let mut found = vec![false; patterns.len()];
    let mut window: Vec<u8> = Vec::with_capacity(SCAN_CHUNK + overlap);
    let mut chunk = vec![0u8; SCAN_CHUNK];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        window.extend_from_slice(&chunk[..read]);
        for (pattern, seen) in patterns.iter().zip(found.iter_mut()) {
            if !*seen && contains(&window, pattern.as_bytes()) {
                *seen = true;
            }
        }
        let keep_from = window.len().saturating_sub(overlap);
        window.drain(..keep_from);
    }
    Ok(patterns
        .iter()
        .zip(found)
        .filter_map(|(pattern, seen)| seen.then_some(*pattern))
        .collect())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}
