//! Provisioner configuration.
//!
//! Configuration is TOML. Every key is optional and unknown keys are
//! rejected:
//!
//! ```toml
//! managed_root = "/opt/mediadeps"
//! connect_timeout_secs = 30
//! max_redirects = 5
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 1000
//!
//! [security]
//! require_trusted_source = true
//!
//! [checksums]
//! ffmpeg = "sha256:<64 hex characters>"
//!
//! [sources]
//! ytdlp = "https://mirror.example.com/yt-dlp"
//! ```
//!
//! The managed root is the configured `managed_root`, else the
//! `MEDIADEPS_ROOT` environment variable, else the platform's local data
//! directory.

use crate::archive::SearchLimits;
use crate::dependency::Dependency;
use crate::error::{ProvisionError, Result};
use crate::security::{ExpectedChecksum, SecurityPolicy};
use crate::transfer::{RetryPolicy, TransferSettings};
use camino::{Utf8Path, Utf8PathBuf};
use directories_next::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that supplies the managed root when none is
/// configured.
pub const ROOT_ENV_VAR: &str = "MEDIADEPS_ROOT";

const INLINE_ORIGIN: &str = "inline";

/// A per-dependency optional setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerDependency<T> {
    /// Setting for yt-dlp.
    pub ytdlp: Option<T>,
    /// Setting for ffmpeg.
    pub ffmpeg: Option<T>,
}

impl<T> Default for PerDependency<T> {
    fn default() -> Self {
        Self {
            ytdlp: None,
            ffmpeg: None,
        }
    }
}

impl<T> PerDependency<T> {
    /// The setting for `dependency`, if any.
    #[must_use]
    pub const fn get(&self, dependency: Dependency) -> Option<&T> {
        match dependency {
            Dependency::YtDlp => self.ytdlp.as_ref(),
            Dependency::Ffmpeg => self.ffmpeg.as_ref(),
        }
    }

    /// Replace the setting for `dependency`.
    pub fn set(&mut self, dependency: Dependency, value: Option<T>) {
        match dependency {
            Dependency::YtDlp => self.ytdlp = value,
            Dependency::Ffmpeg => self.ffmpeg = value,
        }
    }
}

/// Settings for the whole provisioning pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionerConfig {
    /// Directory that holds `dependencies/` and `quarantine/`.
    pub managed_root: Option<Utf8PathBuf>,
    /// Connection timeout for downloads, in seconds.
    pub connect_timeout_secs: u64,
    /// Limit for one whole download, in seconds.
    pub download_timeout_secs: u64,
    /// Limit for the accessibility probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Limit for a version probe, in seconds.
    pub version_timeout_secs: u64,
    /// Redirect hops followed per download.
    pub max_redirects: u32,
    /// Download retry policy.
    pub retry: RetryPolicy,
    /// Bounds for locating executables in extracted archives.
    pub search: SearchLimits,
    /// Install-time security policy.
    pub security: SecurityPolicy,
    /// Expected artifact checksums.
    pub checksums: PerDependency<ExpectedChecksum>,
    /// Download URLs that replace the built-in ones.
    pub sources: PerDependency<String>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        let transfer = TransferSettings::default();
        Self {
            managed_root: None,
            connect_timeout_secs: transfer.connect_timeout.as_secs(),
            download_timeout_secs: transfer.download_timeout.as_secs(),
            probe_timeout_secs: transfer.probe_timeout.as_secs(),
            version_timeout_secs: crate::validator::DEFAULT_VERSION_TIMEOUT.as_secs(),
            max_redirects: transfer.max_redirects,
            retry: RetryPolicy::default(),
            search: SearchLimits::default(),
            security: SecurityPolicy::default(),
            checksums: PerDependency::default(),
            sources: PerDependency::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Read configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] if the file cannot be read or
    /// parsed.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| ProvisionError::Config {
            origin: path.to_string(),
            reason: err.to_string(),
        })?;
        log::debug!("loaded configuration from {path}");
        Self::parse(&text, path.as_str())
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] if the text is not valid
    /// configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadeps_provisioner::config::ProvisionerConfig;
    ///
    /// let config = ProvisionerConfig::from_toml_str("max_redirects = 2").unwrap();
    /// assert_eq!(config.max_redirects, 2);
    /// assert_eq!(config.retry.max_retries, 3);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::parse(text, INLINE_ORIGIN)
    }

    fn parse(text: &str, origin: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| ProvisionError::Config {
            origin: origin.to_owned(),
            reason: err.to_string(),
        })
    }

    /// Transfer settings derived from the timeout keys.
    #[must_use]
    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            max_redirects: self.max_redirects,
            ..TransferSettings::default()
        }
    }

    /// Limit for a version probe.
    #[must_use]
    pub const fn version_timeout(&self) -> Duration {
        Duration::from_secs(self.version_timeout_secs)
    }

    /// Resolve the managed root directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when nothing is configured and
    /// the platform data directory is unknown or not UTF-8.
    pub fn resolve_root(&self) -> Result<Utf8PathBuf> {
        if let Some(root) = &self.managed_root {
            return Ok(root.clone());
        }
        if let Some(root) = std::env::var_os(ROOT_ENV_VAR).filter(|value| !value.is_empty()) {
            return Utf8PathBuf::from_path_buf(root.into()).map_err(|path| ProvisionError::Config {
                origin: ROOT_ENV_VAR.to_owned(),
                reason: format!("path is not valid UTF-8: {}", path.display()),
            });
        }
        default_root()
    }
}

fn default_root() -> Result<Utf8PathBuf> {
    let dirs = ProjectDirs::from("", "", "mediadeps").ok_or_else(|| ProvisionError::Config {
        origin: "platform".to_owned(),
        reason: "could not determine a data directory".to_owned(),
    })?;
    Utf8PathBuf::from_path_buf(dirs.data_local_dir().to_path_buf()).map_err(|path| {
        ProvisionError::Config {
            origin: "platform".to_owned(),
            reason: format!("data directory is not valid UTF-8: {}", path.display()),
        }
    })
}
