//! Binary validation: existence, execute permission, and a version probe.
//!
//! The version probe runs the binary with a bounded timeout. A probe that
//! does not finish in time is killed and reaped, and reads as "no response".

use regex::Regex;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Default limit for a version probe.
pub const DEFAULT_VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of each output stream kept for version parsing.
const MAX_PROBE_OUTPUT: u64 = 64 * 1024;

#[cfg(target_os = "linux")]
const SPAWN_BUSY_RETRIES: u32 = 5;

/// What a responsive binary reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// The binary that was probed.
    pub executable: std::path::PathBuf,
    /// Version parsed from the first output line, when one matched.
    pub version: Option<String>,
}

/// Report whether `path` is a regular file this process may execute.
///
/// On Unix any execute bit counts. On Windows the extension decides.
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    has_execute_permission(path, &meta)
}

#[cfg(unix)]
fn has_execute_permission(_path: &Path, meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_execute_permission(path: &Path, _meta: &fs::Metadata) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ["exe", "bat", "cmd", "com"]
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Add `0o755` to the permission bits of `path`.
///
/// A no-op on platforms without Unix permissions.
///
/// # Errors
///
/// Returns an error if the metadata cannot be read or the permissions
/// cannot be changed.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)?;
    log::debug!("set executable permission on {}", path.display());
    Ok(())
}

/// Add `0o755` to the permission bits of `path`.
///
/// A no-op on platforms without Unix permissions.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Run `path` with `args` and parse its version banner.
///
/// Returns `None` when the binary cannot be spawned, does not exit within
/// `timeout`, or prints nothing. Otherwise the report carries the first
/// `\d+\.[\d.]+` match from the first line of stdout (or of stderr when the
/// exit status is non-zero or stdout is blank).
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::validator::probe_version;
/// use std::path::Path;
/// use std::time::Duration;
///
/// let missing = probe_version(Path::new("/no/such/tool"), &["--version"], Duration::from_secs(1));
/// assert!(missing.is_none());
/// ```
#[must_use]
pub fn probe_version(path: &Path, args: &[&str], timeout: Duration) -> Option<ValidationReport> {
    let mut child = match spawn_probe(path, args) {
        Ok(child) => child,
        Err(err) => {
            log::debug!("failed to spawn {}: {err}", path.display());
            return None;
        }
    };

    // Drain both pipes while waiting so a chatty binary cannot block on a
    // full pipe buffer.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            log::warn!(
                "{} did not answer within {}s; killing it",
                path.display(),
                timeout.as_secs()
            );
            reap(&mut child);
            return None;
        }
        Err(err) => {
            log::debug!("waiting for {} failed: {err}", path.display());
            reap(&mut child);
            return None;
        }
    };

    let stdout = collect(stdout);
    let stderr = collect(stderr);
    let output = if status.success() && !stdout.trim().is_empty() {
        stdout
    } else {
        stderr
    };
    let first_line = output.lines().map(str::trim).find(|line| !line.is_empty())?;

    Some(ValidationReport {
        executable: path.to_path_buf(),
        version: parse_version(first_line),
    })
}

/// Extract the first dotted version number from `line`.
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::validator::parse_version;
///
/// assert_eq!(parse_version("ffmpeg version 7.0.1-static"), Some("7.0.1".to_owned()));
/// assert_eq!(parse_version("2024.08.06"), Some("2024.08.06".to_owned()));
/// assert_eq!(parse_version("ffmpeg version N-112233-gdeadbeef"), None);
/// ```
#[must_use]
pub fn parse_version(line: &str) -> Option<String> {
    version_pattern()?
        .find(line)
        .map(|found| found.as_str().to_owned())
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\d+\.[\d.]+").ok())
        .as_ref()
}

fn spawn_probe(path: &Path, args: &[&str]) -> io::Result<Child> {
    let mut cmd = Command::new(path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    spawn_retrying_busy(&mut cmd)
}

#[cfg(target_os = "linux")]
fn spawn_retrying_busy(cmd: &mut Command) -> io::Result<Child> {
    let mut attempt = 0;
    loop {
        match cmd.spawn() {
            // A freshly written binary can be briefly busy while another
            // thread's fork still holds its write descriptor.
            Err(err)
                if err.raw_os_error() == Some(libc::ETXTBSY) && attempt < SPAWN_BUSY_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(20));
            }
            result => return result,
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn spawn_retrying_busy(cmd: &mut Command) -> io::Result<Child> {
    cmd.spawn()
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Read `stream` to its end on a helper thread, keeping the first
/// [`MAX_PROBE_OUTPUT`] bytes and discarding the rest.
fn drain<R>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    stream.map(|stream| {
        thread::spawn(move || {
            let mut kept = Vec::new();
            let mut head = stream.take(MAX_PROBE_OUTPUT);
            if head.read_to_end(&mut kept).is_ok() {
                let _ = io::copy(&mut head.into_inner(), &mut io::sink());
            }
            kept
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
