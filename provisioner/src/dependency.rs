//! The closed set of managed dependencies.
//!
//! Library APIs take [`Dependency`] values, never names, so an unknown
//! dependency cannot reach the pipeline. Parsing from a string exists for the
//! command-line host only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A dependency binary managed by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dependency {
    /// `yt-dlp`, the media metadata and download tool.
    YtDlp,
    /// `ffmpeg`, the media transcoder.
    Ffmpeg,
}

impl Dependency {
    /// Every managed dependency, in status order.
    pub const ALL: [Self; 2] = [Self::YtDlp, Self::Ffmpeg];

    /// Stable identifier, also used as the on-disk directory name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::YtDlp => "ytdlp",
            Self::Ffmpeg => "ffmpeg",
        }
    }

    /// The upstream project name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::YtDlp => "yt-dlp",
            Self::Ffmpeg => "FFmpeg",
        }
    }

    /// Arguments that make the binary print its version and exit.
    #[must_use]
    pub const fn version_args(self) -> &'static [&'static str] {
        match self {
            Self::YtDlp => &["--version"],
            Self::Ffmpeg => &["-version"],
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no managed dependency.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dependency '{name}'; expected one of: ytdlp, ffmpeg")]
pub struct UnknownDependency {
    /// The rejected input.
    pub name: String,
}

impl FromStr for Dependency {
    type Err = UnknownDependency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ytdlp" | "yt-dlp" | "yt_dlp" => Ok(Self::YtDlp),
            "ffmpeg" => Ok(Self::Ffmpeg),
            _ => Err(UnknownDependency { name: s.to_owned() }),
        }
    }
}
