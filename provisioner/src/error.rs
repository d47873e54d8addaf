//! Error types for the provisioning pipeline.
//!
//! The variants follow the pipeline stages: platform resolution, transfer,
//! installation, validation, and security. Status checks never surface these
//! errors; they are folded into [`crate::status::DependencyInfo::error`]
//! instead. Installs always return them after temporary resources are gone.

use crate::dependency::Dependency;
use crate::transfer::DownloadError;
use thiserror::Error;

/// Errors that can occur while provisioning a dependency.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The host operating system is not one of the supported targets.
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform {
        /// Operating system reported by the host.
        os: String,
        /// CPU architecture reported by the host.
        arch: String,
    },

    /// Fetching the dependency artifact failed.
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    /// Unpacking or staging the dependency failed.
    #[error("failed to install {dependency}: {reason}")]
    Installation {
        /// Dependency being installed.
        dependency: Dependency,
        /// Description of the failure.
        reason: String,
    },

    /// The installed binary is not usable.
    #[error("validation failed for {dependency}: {reason}")]
    Validation {
        /// Dependency that failed validation.
        dependency: Dependency,
        /// Description of the failure.
        reason: String,
    },

    /// Security verification infrastructure failed.
    #[error("security verification failed: {reason}")]
    Security {
        /// Description of the failure.
        reason: String,
    },

    /// The downloaded artifact failed a critical check and was isolated.
    #[error("{dependency} artifact quarantined: {}", .issues.join("; "))]
    Quarantined {
        /// Dependency whose artifact was quarantined.
        dependency: Dependency,
        /// Issues recorded against the artifact.
        issues: Vec<String>,
    },

    /// Configuration could not be read or parsed.
    #[error("invalid configuration ({origin}): {reason}")]
    Config {
        /// Where the configuration came from (a file path or `inline`).
        origin: String,
        /// Description of the problem.
        reason: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Build an [`ProvisionError::Installation`] from any displayable cause.
    pub fn installation(dependency: Dependency, reason: impl std::fmt::Display) -> Self {
        Self::Installation {
            dependency,
            reason: reason.to_string(),
        }
    }
}

impl Clone for ProvisionError {
    fn clone(&self) -> Self {
        match self {
            Self::UnsupportedPlatform { os, arch } => Self::UnsupportedPlatform {
                os: os.clone(),
                arch: arch.clone(),
            },
            Self::Download(err) => Self::Download(err.clone()),
            Self::Installation { dependency, reason } => Self::Installation {
                dependency: *dependency,
                reason: reason.clone(),
            },
            Self::Validation { dependency, reason } => Self::Validation {
                dependency: *dependency,
                reason: reason.clone(),
            },
            Self::Security { reason } => Self::Security {
                reason: reason.clone(),
            },
            Self::Quarantined { dependency, issues } => Self::Quarantined {
                dependency: *dependency,
                issues: issues.clone(),
            },
            Self::Config { origin, reason } => Self::Config {
                origin: origin.clone(),
                reason: reason.clone(),
            },
            // Lossy: only the kind and message survive.
            Self::Io(source) => Self::Io(std::io::Error::new(source.kind(), source.to_string())),
        }
    }
}

/// Result type alias using [`ProvisionError`].
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_platform_names_os_and_arch() {
        let err = ProvisionError::UnsupportedPlatform {
            os: "freebsd".to_owned(),
            arch: "x86_64".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("freebsd"));
        assert!(msg.contains("x86_64"));
    }

    #[test]
    fn quarantined_lists_every_issue() {
        let err = ProvisionError::Quarantined {
            dependency: Dependency::Ffmpeg,
            issues: vec![
                "Checksum verification failed".to_owned(),
                "Suspicious pattern detected: cmd.exe".to_owned(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("ffmpeg"));
        assert!(msg.contains("Checksum verification failed; Suspicious"));
    }

    #[test]
    fn clone_preserves_io_kind_and_message() {
        let err = ProvisionError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        ));
        let cloned = err.clone();
        match cloned {
            ProvisionError::Io(source) => {
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
                assert!(source.to_string().contains("read-only volume"));
            }
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn installation_helper_formats_reason() {
        let err = ProvisionError::installation(Dependency::YtDlp, "copy failed");
        assert_eq!(err.to_string(), "failed to install ytdlp: copy failed");
    }
}
