//! Streaming HTTP downloads over a `ureq` agent.
//!
//! Redirects are followed here rather than by the agent so every hop is
//! logged and bounded. Bodies land in `<dest>.part` and are renamed onto
//! `dest` once the stream completes.

use super::{ProgressSink, Transfer, TransferProgress};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const COPY_BUFFER_SIZE: usize = 8192;
const PARTIAL_SUFFIX: &str = "part";
const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];
const ACCESSIBLE_STATUSES: [u16; 6] = [200, 301, 302, 303, 307, 308];

/// Errors arising from artifact transfers.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The server answered with a status other than 200.
    #[error("download of {url} failed with HTTP status {status}")]
    Status {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code received.
        status: u16,
    },

    /// Connecting or receiving took longer than the configured limit.
    #[error("download of {url} timed out")]
    Timeout {
        /// The URL that was requested.
        url: String,
    },

    /// The connection failed or broke mid-stream.
    #[error("network error downloading {url}: {reason}")]
    Network {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The redirect chain exceeded the configured hop budget.
    #[error("too many redirects while downloading {url}")]
    TooManyRedirects {
        /// The URL whose redirect was refused.
        url: String,
    },

    /// The accessibility probe rejected the URL before downloading.
    #[error("URL is not accessible: {url}")]
    Inaccessible {
        /// The URL that was probed.
        url: String,
    },

    /// Writing the downloaded file failed.
    #[error("I/O error writing download: {0}")]
    Io(#[from] io::Error),
}

impl Clone for DownloadError {
    fn clone(&self) -> Self {
        match self {
            Self::Status { url, status } => Self::Status {
                url: url.clone(),
                status: *status,
            },
            Self::Timeout { url } => Self::Timeout { url: url.clone() },
            Self::Network { url, reason } => Self::Network {
                url: url.clone(),
                reason: reason.clone(),
            },
            Self::TooManyRedirects { url } => Self::TooManyRedirects { url: url.clone() },
            Self::Inaccessible { url } => Self::Inaccessible { url: url.clone() },
            Self::Io(source) => Self::Io(io::Error::new(source.kind(), source.to_string())),
        }
    }
}

/// Timeouts and limits for [`HttpTransfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    /// Limit for establishing a connection.
    pub connect_timeout: Duration,
    /// Limit for one whole request, body included.
    pub download_timeout: Duration,
    /// Limit for the `HEAD` accessibility probe.
    pub probe_timeout: Duration,
    /// Redirect hops followed before giving up.
    pub max_redirects: u32,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(5),
            max_redirects: 5,
            user_agent: format!("mediadeps/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// [`Transfer`] implementation backed by `ureq`.
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::transfer::{HttpTransfer, TransferSettings};
///
/// let transfer = HttpTransfer::new(&TransferSettings::default());
/// // transfer.download(url, dest, &ProgressSink::silent()) in production
/// # let _ = transfer;
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    agent: ureq::Agent,
    probe_agent: ureq::Agent,
    max_redirects: u32,
    user_agent: String,
}

impl HttpTransfer {
    /// Build the download and probe agents from `settings`.
    #[must_use]
    pub fn new(settings: &TransferSettings) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(settings.connect_timeout))
            .timeout_global(Some(settings.download_timeout))
            .max_redirects(0)
            .max_redirects_will_error(false)
            .http_status_as_error(false)
            .build();
        let probe_config = ureq::Agent::config_builder()
            .timeout_connect(Some(settings.probe_timeout))
            .timeout_global(Some(settings.probe_timeout))
            .max_redirects(0)
            .max_redirects_will_error(false)
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            probe_agent: ureq::Agent::new_with_config(probe_config),
            max_redirects: settings.max_redirects,
            user_agent: settings.user_agent.clone(),
        }
    }

    fn fetch(
        &self,
        url: &str,
        partial: &Path,
        progress: &ProgressSink,
        hops_left: u32,
    ) -> Result<u64, DownloadError> {
        log::debug!("GET {url}");
        let response = self
            .agent
            .get(url)
            .header("User-Agent", self.user_agent.as_str())
            .call()
            .map_err(|err| map_ureq_error(url, err))?;
        let status = response.status().as_u16();

        if REDIRECT_STATUSES.contains(&status) {
            let location = header_value(&response, "location").ok_or_else(|| {
                DownloadError::Network {
                    url: url.to_owned(),
                    reason: format!("HTTP {status} redirect without a Location header"),
                }
            })?;
            if hops_left == 0 {
                return Err(DownloadError::TooManyRedirects {
                    url: url.to_owned(),
                });
            }
            let next = resolve_location(url, &location)?;
            log::debug!("following redirect {url} -> {next}");
            return self.fetch(&next, partial, progress, hops_left - 1);
        }

        if status != 200 {
            return Err(DownloadError::Status {
                url: url.to_owned(),
                status,
            });
        }

        let total = header_value(&response, "content-length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        let mut reader = response.into_body().into_reader();
        let mut file = File::create(partial)?;
        let written = stream_body(url, &mut reader, &mut file, total, progress)?;
        file.sync_all()?;
        Ok(written)
    }
}

impl Default for HttpTransfer {
    fn default() -> Self {
        Self::new(&TransferSettings::default())
    }
}

impl Transfer for HttpTransfer {
    fn probe(&self, url: &str) -> bool {
        match self
            .probe_agent
            .head(url)
            .header("User-Agent", self.user_agent.as_str())
            .call()
        {
            Ok(response) => {
                let status = response.status().as_u16();
                log::debug!("HEAD {url} -> {status}");
                ACCESSIBLE_STATUSES.contains(&status)
            }
            Err(err) => {
                log::debug!("HEAD {url} failed: {err}");
                false
            }
        }
    }

    fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressSink,
    ) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(dest);
        let result = self
            .fetch(url, &partial, progress, self.max_redirects)
            .and_then(|written| {
                fs::rename(&partial, dest)?;
                Ok(written)
            });
        match &result {
            Ok(written) => log::info!("downloaded {written} bytes from {url}"),
            Err(err) => {
                log::warn!("{err}");
                remove_partial(&partial);
            }
        }
        result
    }
}

/// The sibling path a body streams into before it is complete.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

fn remove_partial(partial: &Path) {
    match fs::remove_file(partial) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to remove {}: {err}", partial.display()),
    }
}

fn header_value(response: &ureq::http::Response<ureq::Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn resolve_location(base: &str, location: &str) -> Result<String, DownloadError> {
    url::Url::parse(base)
        .and_then(|base_url| base_url.join(location))
        .map(String::from)
        .map_err(|err| DownloadError::Network {
            url: base.to_owned(),
            reason: format!("invalid redirect location '{location}': {err}"),
        })
}

/// Copy the body, reporting progress only when the total size is known.
fn stream_body(
    url: &str,
    reader: &mut impl Read,
    writer: &mut impl Write,
    total: Option<u64>,
    progress: &ProgressSink,
) -> Result<u64, DownloadError> {
    let mut buffer = [0u8; COPY_BUFFER_SIZE];
    let mut downloaded: u64 = 0;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(map_read_error(url, &err)),
        };
        writer.write_all(&buffer[..read])?;
        downloaded = downloaded.saturating_add(read as u64);
        if total.is_some() {
            progress.report(TransferProgress { downloaded, total });
        }
    }
    writer.flush()?;
    Ok(downloaded)
}

fn map_read_error(url: &str, err: &io::Error) -> DownloadError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => DownloadError::Timeout {
            url: url.to_owned(),
        },
        _ => DownloadError::Network {
            url: url.to_owned(),
            reason: err.to_string(),
        },
    }
}

/// Map a ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: ureq::Error) -> DownloadError {
    match err {
        ureq::Error::StatusCode(status) => DownloadError::Status {
            url: url.to_owned(),
            status,
        },
        ureq::Error::Timeout(_) => DownloadError::Timeout {
            url: url.to_owned(),
        },
        ureq::Error::Io(io_err) => map_read_error(url, &io_err),
        ureq::Error::TooManyRedirects => DownloadError::TooManyRedirects {
            url: url.to_owned(),
        },
        other => DownloadError::Network {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
#[path = "download_tests.rs"]
mod tests;
