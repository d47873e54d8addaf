//! Archive extraction and executable discovery.
//!
//! Archives are always unpacked into a scratch directory; the orchestrator
//! copies the executable it finds into the managed tree afterwards.

mod extraction;
mod search;

pub use extraction::{ExtractionError, extract_archive};
pub use search::{SearchLimits, find_executable};

use serde::Serialize;

/// Archive formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    /// A ZIP archive.
    Zip,
    /// A gzip-compressed tarball.
    TarGz,
    /// An xz-compressed tarball.
    TarXz,
    /// An uncompressed tarball.
    Tar,
}

impl ArchiveFormat {
    /// Select a format from a filename suffix, case-insensitively.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadeps_provisioner::archive::ArchiveFormat;
    ///
    /// assert_eq!(ArchiveFormat::from_filename("ffmpeg.tar.xz"), Some(ArchiveFormat::TarXz));
    /// assert_eq!(ArchiveFormat::from_filename("FFMPEG.ZIP"), Some(ArchiveFormat::Zip));
    /// assert_eq!(ArchiveFormat::from_filename("yt-dlp.exe"), None);
    /// ```
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Some(Self::TarXz)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}
