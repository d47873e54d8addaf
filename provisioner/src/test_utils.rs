//! Test helpers shared by unit and behavioural tests.
//!
//! Enabled with the `test-support` feature. Provides a loopback HTTP server,
//! archive builders, and fake tool scripts.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};

/// A canned HTTP response served by [`TestServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    stall: Option<Duration>,
    content_length: bool,
}

impl TestResponse {
    /// A `200 OK` response carrying `body`.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            stall: None,
            content_length: true,
        }
    }

    /// An empty response with the given status.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Vec::new())
        }
    }

    /// A redirect to `location` with the given 3xx status.
    #[must_use]
    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status).with_header("Location", location)
    }

    /// Add a response header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Sleep before answering, to provoke client timeouts.
    #[must_use]
    pub fn stalled(mut self, delay: Duration) -> Self {
        self.stall = Some(delay);
        self
    }

    /// Omit `Content-Length`; the body is sent chunked.
    #[must_use]
    pub fn without_content_length(mut self) -> Self {
        self.content_length = false;
        self
    }
}

#[derive(Debug, Default)]
struct ServerState {
    routes: HashMap<String, TestResponse>,
    hits: HashMap<String, usize>,
}

/// A `tiny_http` server bound to `127.0.0.1` on an ephemeral port.
///
/// Each request is answered on its own thread, so a stalled route does not
/// hold up the others. Unknown paths answer `404`. The server stops when
/// dropped.
pub struct TestServer {
    addr: SocketAddr,
    server: Arc<Server>,
    state: Arc<Mutex<ServerState>>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for TestServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestServer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl TestServer {
    /// Bind and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub fn start() -> io::Result<Self> {
        let server = Arc::new(Server::http("127.0.0.1:0").map_err(io::Error::other)?);
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| io::Error::other("test server is not bound to an IP address"))?;
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_server = Arc::clone(&server);
        let accept_state = Arc::clone(&state);
        let handle = thread::spawn(move || {
            for request in accept_server.incoming_requests() {
                let request_state = Arc::clone(&accept_state);
                thread::spawn(move || {
                    if let Err(err) = respond(request, &request_state) {
                        log::debug!("test server response error: {err}");
                    }
                });
            }
        });

        Ok(Self {
            addr,
            server,
            state,
            handle: Some(handle),
        })
    }

    /// Register (or replace) the response for `path`.
    pub fn route(&self, path: &str, response: TestResponse) {
        lock(&self.state)
            .routes
            .insert(path.to_owned(), response);
    }

    /// Absolute URL for `path` on this server.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Number of requests (any method) received for `path`.
    #[must_use]
    pub fn hits(&self, path: &str) -> usize {
        lock(&self.state).hits.get(path).copied().unwrap_or(0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn lock(state: &Mutex<ServerState>) -> std::sync::MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn respond(request: Request, state: &Mutex<ServerState>) -> io::Result<()> {
    let response = {
        let mut guard = lock(state);
        let path = request.url();
        *guard.hits.entry(path.to_owned()).or_insert(0) += 1;
        guard
            .routes
            .get(path)
            .cloned()
            .unwrap_or_else(|| TestResponse::status(404))
    };

    if let Some(delay) = response.stall {
        thread::sleep(delay);
    }

    let headers = response
        .headers
        .iter()
        .filter_map(|(name, value)| Header::from_bytes(name.as_bytes(), value.as_bytes()).ok())
        .collect();
    // tiny_http sends a known length as `Content-Length` only below the
    // chunked threshold, and chunks the body otherwise.
    let length = response.content_length.then_some(response.body.len());
    let reply = Response::new(
        StatusCode(response.status),
        headers,
        io::Cursor::new(response.body),
        length,
        None,
    )
    .with_chunked_threshold(usize::MAX);
    // HEAD requests get the headers only.
    request.respond(reply)
}

/// Build an in-memory ZIP archive from `(path, contents, mode)` entries.
///
/// # Errors
///
/// Returns an error if the archive cannot be written.
pub fn zip_archive(entries: &[(&str, &[u8], u32)]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
    for (name, contents, mode) in entries {
        let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
        writer.start_file(*name, options)?;
        writer.write_all(contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Build an uncompressed tar stream from `(path, contents, mode)` entries.
///
/// # Errors
///
/// Returns an error if the archive cannot be written.
pub fn tar_archive(entries: &[(&str, &[u8], u32)]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, contents, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents)?;
    }
    builder.into_inner()
}

/// Build a gzip-compressed tar archive.
///
/// # Errors
///
/// Returns an error if the archive cannot be written.
pub fn tar_gz_archive(entries: &[(&str, &[u8], u32)]) -> io::Result<Vec<u8>> {
    let tar = tar_archive(entries)?;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar)?;
    encoder.finish()
}

/// Build an xz-compressed tar archive.
///
/// # Errors
///
/// Returns an error if the archive cannot be written.
pub fn tar_xz_archive(entries: &[(&str, &[u8], u32)]) -> io::Result<Vec<u8>> {
    let tar = tar_archive(entries)?;
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(&tar)?;
    encoder.finish()
}

/// A POSIX shell script that prints `banner` and exits successfully.
#[must_use]
pub fn fake_tool_script(banner: &str) -> Vec<u8> {
    format!("#!/bin/sh\necho '{banner}'\n").into_bytes()
}

/// Write `contents` to `path` and mark it executable.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_executable(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    crate::validator::make_executable(path)
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
