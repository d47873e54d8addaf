//! Transfer engine: streaming downloads, accessibility probes and retry.
//!
//! [`Transfer`] is the seam between the orchestrator and the network. The
//! production implementation is [`HttpTransfer`]; tests substitute a mock or
//! point an `HttpTransfer` at a loopback server.

mod download;
mod retry;

pub use download::{DownloadError, HttpTransfer, TransferSettings};
pub use retry::{RetryPolicy, retry_with_backoff, retry_with_backoff_notify};

use std::path::Path;
use std::time::Duration;

/// Byte-level progress for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes written so far.
    pub downloaded: u64,
    /// Total size announced by the server, when known.
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Completion percentage, or `None` when the total size is unknown.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadeps_provisioner::transfer::TransferProgress;
    ///
    /// let halfway = TransferProgress { downloaded: 50, total: Some(200) };
    /// assert_eq!(halfway.percent(), Some(25));
    /// let unknown = TransferProgress { downloaded: 50, total: None };
    /// assert_eq!(unknown.percent(), None);
    /// ```
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        let total = self.total.filter(|total| *total > 0)?;
        let pct = self.downloaded.saturating_mul(100) / total;
        Some(u8::try_from(pct.min(100)).unwrap_or(100))
    }
}

/// Receives [`TransferProgress`] updates while a body streams to disk.
pub struct ProgressSink {
    callback: Box<dyn Fn(TransferProgress) + Send + Sync>,
}

impl ProgressSink {
    /// Wrap a progress callback.
    pub fn new(callback: impl Fn(TransferProgress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sink that discards every update.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    /// Forward one update.
    pub fn report(&self, progress: TransferProgress) {
        (self.callback)(progress);
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

/// Fetches remote artifacts onto the local file system.
#[cfg_attr(test, mockall::automock)]
pub trait Transfer {
    /// Cheaply check whether `url` looks downloadable.
    ///
    /// Never fails; any error reads as "not accessible".
    fn probe(&self, url: &str) -> bool;

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on a non-success status, a timeout, a
    /// network failure, or an I/O failure. `dest` never holds a partial body
    /// when this returns an error.
    fn download(&self, url: &str, dest: &Path, progress: &ProgressSink)
    -> Result<u64, DownloadError>;
}

/// Download `url` into `dest`, retrying failed attempts with backoff.
///
/// `on_retry` receives the failed attempt number (starting at zero), the
/// error, and the delay before the next attempt.
///
/// # Errors
///
/// Returns the error from the final attempt once the policy is exhausted.
pub fn download_with_retry(
    transfer: &dyn Transfer,
    url: &str,
    dest: &Path,
    policy: &RetryPolicy,
    progress: &ProgressSink,
    on_retry: impl FnMut(u32, &DownloadError, Duration),
) -> Result<u64, DownloadError> {
    retry_with_backoff_notify(
        policy,
        |_| transfer.download(url, dest, progress),
        on_retry,
    )
}

/// Render a byte count with binary units.
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::transfer::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 Bytes");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(2 * 1024 * 1024), "2 MB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_owned();
    }
    let mut unit = 0;
    let mut divisor: u64 = 1;
    while unit + 1 < UNITS.len() && bytes >= divisor.saturating_mul(1024) {
        divisor = divisor.saturating_mul(1024);
        unit += 1;
    }
    // Two decimal places, trailing zeros dropped.
    let hundredths = u128::from(bytes) * 100 / u128::from(divisor);
    let whole = hundredths / 100;
    let frac = hundredths % 100;
    let name = UNITS.get(unit).copied().unwrap_or("GB");
    match frac {
        0 => format!("{whole} {name}"),
        f if f % 10 == 0 => format!("{whole}.{} {name}", f / 10),
        f => format!("{whole}.{f:02} {name}"),
    }
}
