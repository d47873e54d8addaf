//! Platform resolution and the managed directory layout.
//!
//! [`HostPlatform`] maps the host operating system and CPU architecture to a
//! [`DependencyDescriptor`] per dependency. [`ManagedLayout`] performs the
//! path arithmetic for the fixed, versionless layout:
//!
//! ```text
//! <root>/dependencies/<dependency>/bin/<executable>
//! <root>/quarantine/<name>.quarantine
//! <root>/quarantine/<name>.metadata.json
//! ```
//!
//! Nothing here touches the file system.

use crate::archive::ArchiveFormat;
use crate::dependency::Dependency;
use crate::error::{ProvisionError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

const YTDLP_RELEASE_BASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download";
const BTBN_RELEASE_BASE: &str = "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest";
const EVERMEET_RELEASE_URL: &str = "https://evermeet.cx/ffmpeg/getrelease/zip";
const JOHNVANSICKLE_RELEASE_BASE: &str = "https://johnvansickle.com/ffmpeg/releases";

const DEPENDENCIES_DIRNAME: &str = "dependencies";
const QUARANTINE_DIRNAME: &str = "quarantine";
const BIN_DIRNAME: &str = "bin";

/// Operating systems with published dependency builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Microsoft Windows.
    Windows,
    /// Apple macOS.
    MacOs,
    /// Linux.
    Linux,
}

/// CPU architectures that select between upstream builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64-bit x86.
    X86_64,
    /// 64-bit ARM.
    Aarch64,
    /// Anything else; resolves to the 32-bit x86 builds.
    Other,
}

/// The static download recipe for one dependency on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDescriptor {
    /// The dependency this descriptor provisions.
    pub dependency: Dependency,
    /// Where the artifact is downloaded from.
    pub download_url: String,
    /// Local filename for the downloaded artifact; its suffix selects the
    /// package format.
    pub archive_filename: String,
    /// Name of the executable inside the managed `bin/` directory.
    pub executable_name: String,
}

/// How a downloaded artifact becomes an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    /// The artifact is the executable itself.
    Executable,
    /// The executable must be extracted from an archive.
    Archive(ArchiveFormat),
}

impl DependencyDescriptor {
    /// Derive the package format from [`Self::archive_filename`].
    ///
    /// Returns `None` for filenames that are neither a known archive nor a
    /// plain executable (no extension, or `.exe`).
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadeps_provisioner::archive::ArchiveFormat;
    /// use mediadeps_provisioner::dependency::Dependency;
    /// use mediadeps_provisioner::platform::{DependencyDescriptor, PackageFormat};
    ///
    /// let descriptor = DependencyDescriptor {
    ///     dependency: Dependency::Ffmpeg,
    ///     download_url: "https://example.com/ffmpeg.tar.xz".to_owned(),
    ///     archive_filename: "ffmpeg.tar.xz".to_owned(),
    ///     executable_name: "ffmpeg".to_owned(),
    /// };
    /// assert_eq!(
    ///     descriptor.package_format(),
    ///     Some(PackageFormat::Archive(ArchiveFormat::TarXz))
    /// );
    /// ```
    #[must_use]
    pub fn package_format(&self) -> Option<PackageFormat> {
        if let Some(format) = ArchiveFormat::from_filename(&self.archive_filename) {
            return Some(PackageFormat::Archive(format));
        }
        let lower = self.archive_filename.to_ascii_lowercase();
        if lower.ends_with(".exe") || !lower.contains('.') {
            Some(PackageFormat::Executable)
        } else {
            None
        }
    }
}

/// The host platform, restricted to supported operating systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HostPlatform {
    os: Os,
    arch: Arch,
}

impl HostPlatform {
    /// Detect the platform this process runs on.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::UnsupportedPlatform`] when the host OS is
    /// not Windows, macOS, or Linux.
    pub fn detect() -> Result<Self> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Build a platform from `std::env::consts`-style identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::UnsupportedPlatform`] for any OS other than
    /// `windows`, `macos`, or `linux`.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadeps_provisioner::platform::{HostPlatform, Os};
    ///
    /// let platform = HostPlatform::from_parts("linux", "x86_64").unwrap();
    /// assert_eq!(platform.os(), Os::Linux);
    /// assert!(HostPlatform::from_parts("freebsd", "x86_64").is_err());
    /// ```
    pub fn from_parts(os: &str, arch: &str) -> Result<Self> {
        let os_kind = match os {
            "windows" => Os::Windows,
            "macos" => Os::MacOs,
            "linux" => Os::Linux,
            _ => {
                return Err(ProvisionError::UnsupportedPlatform {
                    os: os.to_owned(),
                    arch: arch.to_owned(),
                });
            }
        };
        let arch_kind = match arch {
            "x86_64" => Arch::X86_64,
            "aarch64" => Arch::Aarch64,
            _ => Arch::Other,
        };
        Ok(Self {
            os: os_kind,
            arch: arch_kind,
        })
    }

    /// The operating system.
    #[must_use]
    pub const fn os(&self) -> Os {
        self.os
    }

    /// The CPU architecture.
    #[must_use]
    pub const fn arch(&self) -> Arch {
        self.arch
    }

    /// Return the descriptor for one dependency.
    #[must_use]
    pub fn descriptor(&self, dependency: Dependency) -> DependencyDescriptor {
        match dependency {
            Dependency::YtDlp => self.ytdlp_descriptor(),
            Dependency::Ffmpeg => self.ffmpeg_descriptor(),
        }
    }

    /// Return the descriptors for every dependency, in [`Dependency::ALL`]
    /// order.
    #[must_use]
    pub fn descriptors(&self) -> [DependencyDescriptor; 2] {
        Dependency::ALL.map(|dependency| self.descriptor(dependency))
    }

    fn ytdlp_descriptor(&self) -> DependencyDescriptor {
        let (asset, filename) = match self.os {
            Os::Windows => ("yt-dlp.exe", "yt-dlp.exe"),
            Os::MacOs => ("yt-dlp_macos", "yt-dlp"),
            Os::Linux => ("yt-dlp", "yt-dlp"),
        };
        DependencyDescriptor {
            dependency: Dependency::YtDlp,
            download_url: format!("{YTDLP_RELEASE_BASE}/{asset}"),
            archive_filename: filename.to_owned(),
            executable_name: filename.to_owned(),
        }
    }

    fn ffmpeg_descriptor(&self) -> DependencyDescriptor {
        let (download_url, archive_filename, executable_name) = match (self.os, self.arch) {
            (Os::Windows, Arch::X86_64) => (
                format!("{BTBN_RELEASE_BASE}/ffmpeg-master-latest-win64-gpl.zip"),
                "ffmpeg-win64-gpl.zip",
                "ffmpeg.exe",
            ),
            (Os::Windows, _) => (
                format!("{BTBN_RELEASE_BASE}/ffmpeg-master-latest-win32-gpl.zip"),
                "ffmpeg-win32-gpl.zip",
                "ffmpeg.exe",
            ),
            (Os::MacOs, _) => (
                EVERMEET_RELEASE_URL.to_owned(),
                "ffmpeg-macos.zip",
                "ffmpeg",
            ),
            (Os::Linux, Arch::X86_64) => (
                format!("{JOHNVANSICKLE_RELEASE_BASE}/ffmpeg-release-amd64-static.tar.xz"),
                "ffmpeg-linux-amd64.tar.xz",
                "ffmpeg",
            ),
            (Os::Linux, Arch::Aarch64) => (
                format!("{JOHNVANSICKLE_RELEASE_BASE}/ffmpeg-release-arm64-static.tar.xz"),
                "ffmpeg-linux-arm64.tar.xz",
                "ffmpeg",
            ),
            (Os::Linux, Arch::Other) => (
                format!("{JOHNVANSICKLE_RELEASE_BASE}/ffmpeg-release-i686-static.tar.xz"),
                "ffmpeg-linux-i686.tar.xz",
                "ffmpeg",
            ),
        };
        DependencyDescriptor {
            dependency: Dependency::Ffmpeg,
            download_url,
            archive_filename: archive_filename.to_owned(),
            executable_name: executable_name.to_owned(),
        }
    }
}

/// Path arithmetic for the managed directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedLayout {
    root: Utf8PathBuf,
}

impl ManagedLayout {
    /// Create a layout rooted at the host-provided application data root.
    #[must_use]
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// The application data root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding every installed dependency.
    #[must_use]
    pub fn dependencies_dir(&self) -> Utf8PathBuf {
        self.root.join(DEPENDENCIES_DIRNAME)
    }

    /// Install directory for one dependency.
    #[must_use]
    pub fn dependency_dir(&self, dependency: Dependency) -> Utf8PathBuf {
        self.dependencies_dir().join(dependency.as_str())
    }

    /// The `bin/` directory for one dependency.
    #[must_use]
    pub fn bin_dir(&self, dependency: Dependency) -> Utf8PathBuf {
        self.dependency_dir(dependency).join(BIN_DIRNAME)
    }

    /// The stable executable path for a descriptor.
    #[must_use]
    pub fn executable_path(&self, descriptor: &DependencyDescriptor) -> Utf8PathBuf {
        self.bin_dir(descriptor.dependency)
            .join(&descriptor.executable_name)
    }

    /// Directory holding quarantined artifacts.
    #[must_use]
    pub fn quarantine_dir(&self) -> Utf8PathBuf {
        self.root.join(QUARANTINE_DIRNAME)
    }
}
