//! Mediadeps provisioner library.
//!
//! This crate acquires, verifies, and installs the yt-dlp and FFmpeg binaries
//! a media application needs at runtime. It resolves the host platform to a
//! download, fetches it with retry, checks the artifact against expected
//! checksums and a trusted-source allow-list, unpacks archives, installs the
//! executable into a managed directory, and validates it with a version
//! probe. The `mediadeps` binary is a thin command-line host over
//! [`manager::DependencyManager`].
//!
//! # Modules
//!
//! - [`archive`] - Archive extraction and executable discovery
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - TOML configuration and managed-root resolution
//! - [`dependency`] - The closed set of managed dependencies
//! - [`error`] - Pipeline error types
//! - [`events`] - Lifecycle events and the subscriber bus
//! - [`manager`] - Status checks, installs, and cleanup
//! - [`platform`] - Platform resolution and the managed layout
//! - [`security`] - Checksums, trusted sources, scanning, and quarantine
//! - [`status`] - Status snapshots and progress payloads
//! - [`transfer`] - Streaming downloads, probes, and retry
//! - [`validator`] - Binary validation and version probes

pub mod archive;
pub mod cli;
pub mod config;
pub mod dependency;
pub mod error;
pub mod events;
pub mod manager;
pub mod platform;
pub mod security;
pub mod status;
pub mod transfer;
pub mod validator;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
