//! Quarantine storage for artifacts that failed a critical check.
//!
//! Each quarantined artifact is kept as `<name>.quarantine` beside a
//! `<name>.metadata.json` sidecar. Nothing is deleted until an explicit
//! release.

use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const ARTIFACT_SUFFIX: &str = ".quarantine";
const METADATA_SUFFIX: &str = ".metadata.json";

/// Sidecar written next to every quarantined artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineRecord {
    /// Where the artifact was before it was isolated.
    pub original_path: PathBuf,
    /// When it was isolated.
    pub quarantined_at: DateTime<Utc>,
    /// Findings that led to quarantine.
    pub security_issues: Vec<String>,
    /// Quarantine name.
    pub name: String,
}

/// The quarantine directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    /// Use `dir` as the quarantine directory; nothing is created yet.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The quarantine directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the isolated artifact for `name`.
    #[must_use]
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{ARTIFACT_SUFFIX}"))
    }

    /// Path of the metadata sidecar for `name`.
    #[must_use]
    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{METADATA_SUFFIX}"))
    }

    /// Move `artifact` into quarantine and record why.
    ///
    /// An earlier quarantine under the same name is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Security`] if the directory cannot be
    /// created, the artifact cannot be moved, or the sidecar cannot be
    /// written.
    pub fn isolate(&self, artifact: &Path, name: &str, issues: &[String]) -> Result<QuarantineRecord> {
        fs::create_dir_all(&self.dir).map_err(|err| failure("create quarantine directory", &err))?;
        let target = self.artifact_path(name);
        remove_if_present(&target).map_err(|err| failure("replace quarantined artifact", &err))?;
        move_file(artifact, &target).map_err(|err| failure("move artifact into quarantine", &err))?;

        let record = QuarantineRecord {
            original_path: artifact.to_path_buf(),
            quarantined_at: Utc::now(),
            security_issues: issues.to_vec(),
            name: name.to_owned(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|err| ProvisionError::Security {
            reason: format!("failed to encode quarantine metadata: {err}"),
        })?;
        fs::write(self.metadata_path(name), json)
            .map_err(|err| failure("write quarantine metadata", &err))?;
        log::warn!(
            "quarantined {name} ({} issues) at {}",
            issues.len(),
            target.display()
        );
        Ok(record)
    }

    /// Names of quarantined artifacts, sorted. A missing directory lists
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Security`] if the directory exists but
    /// cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(failure("list quarantine directory", &err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| failure("list quarantine directory", &err))?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(ARTIFACT_SUFFIX)) {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read the sidecar for `name`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Security`] if the sidecar exists but is
    /// unreadable or malformed.
    pub fn record(&self, name: &str) -> Result<Option<QuarantineRecord>> {
        let text = match fs::read_to_string(self.metadata_path(name)) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(failure("read quarantine metadata", &err)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| ProvisionError::Security {
                reason: format!("malformed quarantine metadata for {name}: {err}"),
            })
    }

    /// Delete the artifact and sidecar for `name`. Missing files are fine.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Security`] if either file exists but
    /// cannot be removed.
    pub fn release(&self, name: &str) -> Result<()> {
        remove_if_present(&self.artifact_path(name))
            .and_then(|()| remove_if_present(&self.metadata_path(name)))
            .map_err(|err| failure("release quarantined artifact", &err))?;
        log::info!("released {name} from quarantine");
        Ok(())
    }
}

fn failure(action: &str, err: &io::Error) -> ProvisionError {
    ProvisionError::Security {
        reason: format!("failed to {action}: {err}"),
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Rename, falling back to copy and delete when the rename crosses devices.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        quarantine: Quarantine,
        artifact: PathBuf,
    }

    #[fixture]
    fn setup() -> Fixture {
        let root = TempDir::new().expect("temp dir");
        let artifact = root.path().join("download/yt-dlp.exe");
        fs::create_dir_all(artifact.parent().expect("parent")).expect("mkdir");
        fs::write(&artifact, b"evidence").expect("write artifact");
        let quarantine = Quarantine::new(root.path().join("quarantine"));
        Fixture {
            _root: root,
            quarantine,
            artifact,
        }
    }

    #[rstest]
    fn isolate_moves_artifact_and_writes_sidecar(setup: Fixture) {
        let issues = vec!["Checksum verification failed".to_owned()];

        let record = setup
            .quarantine
            .isolate(&setup.artifact, "ytdlp", &issues)
            .expect("isolate");

        assert!(!setup.artifact.exists());
        let moved = fs::read(setup.quarantine.artifact_path("ytdlp")).expect("read moved");
        assert_eq!(moved, b"evidence");
        assert_eq!(record.security_issues, issues);

        let raw = fs::read_to_string(setup.quarantine.metadata_path("ytdlp")).expect("sidecar");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        for key in ["originalPath", "quarantinedAt", "securityIssues", "name"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(
            setup.quarantine.record("ytdlp").expect("record"),
            Some(record)
        );
    }

    #[rstest]
    fn list_strips_suffix(setup: Fixture) {
        assert!(setup.quarantine.list().expect("empty list").is_empty());
        setup
            .quarantine
            .isolate(&setup.artifact, "ytdlp", &[])
            .expect("isolate");

        assert_eq!(setup.quarantine.list().expect("list"), vec!["ytdlp"]);
    }

    #[rstest]
    fn release_removes_both_files(setup: Fixture) {
        setup
            .quarantine
            .isolate(&setup.artifact, "ytdlp", &[])
            .expect("isolate");

        setup.quarantine.release("ytdlp").expect("release");

        assert!(!setup.quarantine.artifact_path("ytdlp").exists());
        assert!(!setup.quarantine.metadata_path("ytdlp").exists());
        setup.quarantine.release("ytdlp").expect("second release is a no-op");
    }

    #[rstest]
    fn isolate_replaces_earlier_quarantine(setup: Fixture) {
        setup
            .quarantine
            .isolate(&setup.artifact, "ytdlp", &[])
            .expect("first isolate");
        fs::write(&setup.artifact, b"second").expect("rewrite artifact");

        setup
            .quarantine
            .isolate(&setup.artifact, "ytdlp", &[])
            .expect("second isolate");

        let moved = fs::read(setup.quarantine.artifact_path("ytdlp")).expect("read moved");
        assert_eq!(moved, b"second");
    }

    #[rstest]
    fn missing_artifact_is_a_security_error(setup: Fixture) {
        let err = setup
            .quarantine
            .isolate(Path::new("/no/such/artifact"), "ghost", &[])
            .expect_err("nothing to move");
        assert!(matches!(err, ProvisionError::Security { .. }));
    }
}
