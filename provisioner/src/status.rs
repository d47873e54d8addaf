//! Status snapshots and progress payloads exposed to hosts.
//!
//! Every type here serializes with camelCase keys so hosts can forward the
//! values verbatim.

use crate::dependency::Dependency;
use camino::Utf8PathBuf;
use serde::Serialize;
use std::fmt;

/// The latest known facts about one dependency.
///
/// A status check builds a fresh value; existing values are never updated in
/// place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyInfo {
    /// The dependency described.
    pub name: Dependency,
    /// Expected executable path inside the managed layout.
    pub path: Utf8PathBuf,
    /// Whether the executable file exists.
    pub installed: bool,
    /// Whether the executable answered its version probe.
    pub is_valid: bool,
    /// Version parsed from the probe output, when one was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Why the dependency is not usable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyInfo {
    /// A dependency whose executable is absent.
    #[must_use]
    pub fn missing(name: Dependency, path: Utf8PathBuf) -> Self {
        Self {
            name,
            path,
            installed: false,
            is_valid: false,
            version: None,
            error: Some("Dependency not found".to_owned()),
        }
    }

    /// Installed and working.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.installed && self.is_valid
    }

    /// The state this snapshot implies.
    #[must_use]
    pub const fn state(&self) -> DependencyState {
        match (self.installed, self.is_valid) {
            (true, true) => DependencyState::Ready,
            (true, false) => DependencyState::Invalid,
            (false, _) => DependencyState::Missing,
        }
    }
}

/// Status of every managed dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyStatus {
    /// The yt-dlp entry.
    pub ytdlp: DependencyInfo,
    /// The ffmpeg entry.
    pub ffmpeg: DependencyInfo,
}

impl DependencyStatus {
    /// The entry for `dependency`.
    #[must_use]
    pub const fn get(&self, dependency: Dependency) -> &DependencyInfo {
        match dependency {
            Dependency::YtDlp => &self.ytdlp,
            Dependency::Ffmpeg => &self.ffmpeg,
        }
    }

    /// Report whether every dependency is installed and valid.
    #[must_use]
    pub const fn all_ready(&self) -> bool {
        self.ytdlp.is_ready() && self.ffmpeg.is_ready()
    }

    /// Entries in [`Dependency::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = &DependencyInfo> {
        [&self.ytdlp, &self.ffmpeg].into_iter()
    }
}

/// Lifecycle position of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyState {
    /// No status check has run yet.
    NotChecked,
    /// The executable is absent.
    Missing,
    /// The executable exists but did not answer its version probe.
    Invalid,
    /// An install is running.
    Installing,
    /// Installed and valid.
    Ready,
    /// The last install failed.
    Failed,
    /// The last install ended with the artifact in quarantine.
    Quarantined,
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotChecked => "not checked",
            Self::Missing => "missing",
            Self::Invalid => "invalid",
            Self::Installing => "installing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Quarantined => "quarantined",
        })
    }
}

/// Install step reported in [`DownloadProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    /// Fetching the artifact.
    Downloading,
    /// Unpacking an archive.
    Extracting,
    /// Checking the installed binary.
    Validating,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Validating => "validating",
        })
    }
}

/// Transient install progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    /// Dependency being installed.
    pub dependency: Dependency,
    /// Percentage complete, 0 to 100.
    pub progress: u8,
    /// Current step.
    pub status: ProgressStage,
    /// Human-readable detail.
    pub message: String,
}

impl DownloadProgress {
    /// Build a payload, clamping `progress` to 100.
    #[must_use]
    pub fn new(
        dependency: Dependency,
        progress: u8,
        status: ProgressStage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            dependency,
            progress: progress.min(100),
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn info(installed: bool, is_valid: bool) -> DependencyInfo {
        DependencyInfo {
            name: Dependency::Ffmpeg,
            path: Utf8PathBuf::from("/root/dependencies/ffmpeg/bin/ffmpeg"),
            installed,
            is_valid,
            version: is_valid.then(|| "7.0".to_owned()),
            error: None,
        }
    }

    #[rstest]
    #[case(true, true, DependencyState::Ready)]
    #[case(true, false, DependencyState::Invalid)]
    #[case(false, false, DependencyState::Missing)]
    fn state_follows_installed_and_valid(
        #[case] installed: bool,
        #[case] is_valid: bool,
        #[case] expected: DependencyState,
    ) {
        assert_eq!(info(installed, is_valid).state(), expected);
    }

    #[test]
    fn all_ready_needs_both() {
        let mut status = DependencyStatus {
            ytdlp: info(true, true),
            ffmpeg: info(true, true),
        };
        assert!(status.all_ready());
        status.ffmpeg = info(true, false);
        assert!(!status.all_ready());
        assert!(!status.get(Dependency::Ffmpeg).is_ready());
    }

    #[test]
    fn info_serializes_camel_case_and_omits_empty_fields() {
        let json = serde_json::to_value(info(true, true)).expect("serialize");
        assert_eq!(json["name"], "ffmpeg");
        assert_eq!(json["isValid"], true);
        assert_eq!(json["version"], "7.0");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn progress_is_clamped() {
        let progress =
            DownloadProgress::new(Dependency::YtDlp, 250, ProgressStage::Extracting, "unpacking");
        assert_eq!(progress.progress, 100);
        let json = serde_json::to_value(&progress).expect("serialize");
        assert_eq!(json["status"], "extracting");
        assert_eq!(json["dependency"], "ytdlp");
    }
}
