//! The dependency manager: status checks, installs, and cleanup.
//!
//! A [`DependencyManager`] owns the cached [`DependencyStatus`], the
//! [`SecurityVerifier`], and the [`EventBus`]. Installs run their steps
//! sequentially on the calling thread. A second install request for a
//! dependency that is already installing waits for the running install and
//! returns its outcome.

use crate::archive::{extract_archive, find_executable};
use crate::config::ProvisionerConfig;
use crate::dependency::Dependency;
use crate::error::{ProvisionError, Result};
use crate::events::{EventBus, ProvisionEvent};
use crate::platform::{DependencyDescriptor, HostPlatform, ManagedLayout, PackageFormat};
use crate::security::{SecurityVerifier, VerifyRequest};
use crate::status::{
    DependencyInfo, DependencyState, DependencyStatus, DownloadProgress, ProgressStage,
};
use crate::transfer::{
    DownloadError, HttpTransfer, ProgressSink, Transfer, download_with_retry, format_bytes,
};
use crate::validator::{is_executable, make_executable, probe_version};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;

const INSTALL_TEMP_PREFIX: &str = ".install-";
const EXTRACT_DIRNAME: &str = "extract";
const STAGED_EXECUTABLE_PREFIX: &str = ".staged-";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The outcome slot shared by every caller of one running install.
#[derive(Debug, Default)]
struct InFlight {
    outcome: Mutex<Option<Result<()>>>,
    finished: Condvar,
}

impl InFlight {
    fn finish(&self, outcome: Result<()>) {
        let mut slot = lock(&self.outcome);
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.finished.notify_all();
    }

    fn wait(&self) -> Result<()> {
        let mut slot = lock(&self.outcome);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .finished
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Held by the caller that runs an install. Dropping it retires the
/// in-flight entry and releases waiters even if the install unwinds.
struct InstallLease<'a> {
    manager: &'a DependencyManager,
    dependency: Dependency,
    flight: Arc<InFlight>,
}

impl InstallLease<'_> {
    /// Retire the table entry, then hand `outcome` to every waiter.
    fn complete(self, outcome: Result<()>) {
        self.retire();
        self.flight.finish(outcome);
    }

    fn retire(&self) {
        let mut table = lock(&self.manager.in_flight);
        if table
            .get(&self.dependency)
            .is_some_and(|flight| Arc::ptr_eq(flight, &self.flight))
        {
            table.remove(&self.dependency);
        }
    }
}

impl Drop for InstallLease<'_> {
    fn drop(&mut self) {
        self.retire();
        self.flight.finish(Err(ProvisionError::installation(
            self.dependency,
            "install was interrupted",
        )));
    }
}

/// Coordinates provisioning for every managed dependency.
pub struct DependencyManager {
    config: ProvisionerConfig,
    platform: HostPlatform,
    layout: ManagedLayout,
    transfer: Box<dyn Transfer + Send + Sync>,
    verifier: SecurityVerifier,
    events: Arc<EventBus>,
    status: RwLock<Option<DependencyStatus>>,
    in_flight: Mutex<HashMap<Dependency, Arc<InFlight>>>,
    outcomes: Mutex<HashMap<Dependency, DependencyState>>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for DependencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyManager")
            .field("platform", &self.platform)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl DependencyManager {
    /// A manager for the host platform that downloads over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::UnsupportedPlatform`] on an unsupported
    /// host, or [`ProvisionError::Config`] when no managed root can be
    /// resolved.
    pub fn new(config: ProvisionerConfig) -> Result<Self> {
        let platform = HostPlatform::detect()?;
        let transfer = HttpTransfer::new(&config.transfer_settings());
        Self::with_parts(config, platform, Box::new(transfer))
    }

    /// A manager with an explicit platform and transfer implementation.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when no managed root can be
    /// resolved.
    pub fn with_parts(
        config: ProvisionerConfig,
        platform: HostPlatform,
        transfer: Box<dyn Transfer + Send + Sync>,
    ) -> Result<Self> {
        let layout = ManagedLayout::new(config.resolve_root()?);
        let verifier = SecurityVerifier::new(layout.quarantine_dir().into_std_path_buf());
        log::debug!("managing dependencies under {}", layout.root());
        Ok(Self {
            config,
            platform,
            layout,
            transfer,
            verifier,
            events: Arc::new(EventBus::new()),
            status: RwLock::new(None),
            in_flight: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Create the managed root and run the first status check.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Io`] if the managed root cannot be created
    /// and [`ProvisionError::Security`] if the quarantine cannot be.
    pub fn initialize(&self) -> Result<DependencyStatus> {
        log::info!(
            "initializing dependency manager for {:?}/{:?}",
            self.platform.os(),
            self.platform.arch()
        );
        fs::create_dir_all(self.layout.root())?;
        self.verifier.initialize()?;
        let status = self.check_dependencies();
        self.initialized.store(true, Ordering::SeqCst);
        self.events.publish(&ProvisionEvent::Initialized);
        Ok(status)
    }

    /// Whether [`Self::initialize`] has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> Receiver<ProvisionEvent> {
        self.events.subscribe()
    }

    /// The managed directory layout.
    #[must_use]
    pub const fn layout(&self) -> &ManagedLayout {
        &self.layout
    }

    /// The platform descriptors are resolved for.
    #[must_use]
    pub const fn platform(&self) -> HostPlatform {
        self.platform
    }

    /// The security verifier used by installs.
    #[must_use]
    pub const fn verifier(&self) -> &SecurityVerifier {
        &self.verifier
    }

    /// The descriptor for `dependency`, with any configured source URL.
    #[must_use]
    pub fn descriptor(&self, dependency: Dependency) -> DependencyDescriptor {
        let mut descriptor = self.platform.descriptor(dependency);
        if let Some(url) = self.config.sources.get(dependency) {
            descriptor.download_url.clone_from(url);
        }
        descriptor
    }

    /// Where the executable for `dependency` lives once installed.
    #[must_use]
    pub fn dependency_path(&self, dependency: Dependency) -> Utf8PathBuf {
        self.layout.executable_path(&self.descriptor(dependency))
    }

    /// Validate every dependency concurrently and cache the result.
    ///
    /// Never installs anything and never fails; problems are recorded in
    /// [`DependencyInfo::error`].
    pub fn check_dependencies(&self) -> DependencyStatus {
        let [ytdlp, ffmpeg] = thread::scope(|scope| {
            Dependency::ALL
                .map(|dependency| (dependency, scope.spawn(move || self.inspect(dependency))))
                .map(|(dependency, handle)| {
                    handle.join().unwrap_or_else(|_| DependencyInfo {
                        error: Some("status check panicked".to_owned()),
                        ..DependencyInfo::missing(dependency, self.dependency_path(dependency))
                    })
                })
        });
        let status = DependencyStatus { ytdlp, ffmpeg };
        *self
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(status.clone());
        log::info!(
            "status: ytdlp={} ffmpeg={}",
            status.ytdlp.state(),
            status.ffmpeg.state()
        );
        self.events
            .publish(&ProvisionEvent::StatusUpdated(status.clone()));
        status
    }

    fn inspect(&self, dependency: Dependency) -> DependencyInfo {
        let path = self.dependency_path(dependency);
        if !path.is_file() {
            return DependencyInfo::missing(dependency, path);
        }
        let mut info = DependencyInfo {
            name: dependency,
            installed: true,
            is_valid: false,
            version: None,
            error: None,
            path,
        };
        if !is_executable(info.path.as_std_path()) {
            info.error = Some("Binary is not executable".to_owned());
            return info;
        }
        match probe_version(
            info.path.as_std_path(),
            dependency.version_args(),
            self.config.version_timeout(),
        ) {
            Some(report) => {
                info.is_valid = true;
                info.version = report.version;
            }
            None => info.error = Some("Binary did not respond to version probe".to_owned()),
        }
        info
    }

    /// The snapshot from the latest status check.
    #[must_use]
    pub fn status(&self) -> Option<DependencyStatus> {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The latest snapshot for one dependency.
    #[must_use]
    pub fn dependency_status(&self, dependency: Dependency) -> Option<DependencyInfo> {
        self.status()
            .map(|status| status.get(dependency).clone())
    }

    /// Where `dependency` sits in its lifecycle.
    #[must_use]
    pub fn dependency_state(&self, dependency: Dependency) -> DependencyState {
        if lock(&self.in_flight).contains_key(&dependency) {
            return DependencyState::Installing;
        }
        let cached = self.dependency_status(dependency);
        if cached.as_ref().is_some_and(DependencyInfo::is_ready) {
            return DependencyState::Ready;
        }
        if let Some(outcome) = lock(&self.outcomes).get(&dependency) {
            return *outcome;
        }
        cached.map_or(DependencyState::NotChecked, |info| info.state())
    }

    /// Whether the latest snapshot shows every dependency ready.
    #[must_use]
    pub fn are_all_dependencies_ready(&self) -> bool {
        self.status()
            .is_some_and(|status| status.all_ready())
    }

    /// Run a fresh validation of `dependency` without touching the cache.
    #[must_use]
    pub fn validate_dependency(&self, dependency: Dependency) -> bool {
        self.inspect(dependency).is_valid
    }

    /// The version `dependency` reports, if it answers.
    #[must_use]
    pub fn dependency_version(&self, dependency: Dependency) -> Option<String> {
        self.inspect(dependency).version
    }

    /// Download, verify, and install `dependency`.
    ///
    /// A concurrent call for the same dependency waits for the running
    /// install and returns the same outcome.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step. Temporary files are
    /// removed before this returns.
    pub fn install_dependency(&self, dependency: Dependency) -> Result<()> {
        let lease = {
            let mut table = lock(&self.in_flight);
            let running = table.get(&dependency).map(Arc::clone);
            if let Some(flight) = running {
                drop(table);
                log::info!("{dependency} is already installing; waiting for it");
                return flight.wait();
            }
            let flight = Arc::new(InFlight::default());
            table.insert(dependency, Arc::clone(&flight));
            InstallLease {
                manager: self,
                dependency,
                flight,
            }
        };

        let outcome = self.run_install(dependency);
        lease.complete(outcome.clone());
        outcome
    }

    fn run_install(&self, dependency: Dependency) -> Result<()> {
        log::info!("installing {}", dependency.display_name());
        self.events
            .publish(&ProvisionEvent::InstallStarted(dependency));

        match self.install_steps(dependency) {
            Ok(()) => {
                lock(&self.outcomes).remove(&dependency);
                log::info!("installed {}", dependency.display_name());
                self.events
                    .publish(&ProvisionEvent::InstallCompleted(dependency));
                Ok(())
            }
            Err(err) => {
                let state = if matches!(err, ProvisionError::Quarantined { .. }) {
                    DependencyState::Quarantined
                } else {
                    DependencyState::Failed
                };
                lock(&self.outcomes).insert(dependency, state);
                log::warn!("installing {dependency} failed: {err}");
                self.events.publish(&ProvisionEvent::InstallFailed {
                    dependency,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn install_steps(&self, dependency: Dependency) -> Result<()> {
        let descriptor = self.descriptor(dependency);
        let dependency_dir = self.layout.dependency_dir(dependency);

        // Step 1: Remove any previous install.
        remove_dir_if_present(dependency_dir.as_std_path())?;

        // Step 2: The temporary directory is removed when it drops.
        fs::create_dir_all(self.layout.root())?;
        let temp_dir = tempfile::Builder::new()
            .prefix(INSTALL_TEMP_PREFIX)
            .tempdir_in(self.layout.root())?;

        // Step 3: Probe and download.
        let artifact = temp_dir.path().join(&descriptor.archive_filename);
        self.acquire(&descriptor, &artifact)?;

        // Step 4: Verify the artifact.
        if self.config.security.verify_downloads {
            self.verify_artifact(&descriptor, &artifact)?;
        }

        // Step 5: Resolve the executable.
        let source = match descriptor.package_format() {
            Some(PackageFormat::Executable) => artifact,
            Some(PackageFormat::Archive(format)) => {
                self.progress(dependency, 100, ProgressStage::Extracting, "Extracting archive");
                let extract_dir = temp_dir.path().join(EXTRACT_DIRNAME);
                extract_archive(&artifact, &extract_dir, format)
                    .map_err(|err| ProvisionError::installation(dependency, err))?;
                locate_executable(&extract_dir, &descriptor, &self.config)?
            }
            None => {
                return Err(ProvisionError::installation(
                    dependency,
                    format!("unsupported package format: {}", descriptor.archive_filename),
                ));
            }
        };

        // Step 6: Install into bin/ and mark executable.
        let target = self.layout.executable_path(&descriptor);
        install_executable(&source, &target)
            .map_err(|err| ProvisionError::installation(dependency, err))?;

        // Step 7: Validate the installed binary.
        self.progress(dependency, 100, ProgressStage::Validating, "Validating installation");
        self.validate_installed(dependency, &target)?;

        // Step 8: Refresh cached status.
        self.check_dependencies();
        Ok(())
    }

    fn acquire(&self, descriptor: &DependencyDescriptor, artifact: &Path) -> Result<()> {
        let dependency = descriptor.dependency;
        let url = descriptor.download_url.as_str();
        if !self.transfer.probe(url) {
            return Err(DownloadError::Inaccessible {
                url: url.to_owned(),
            }
            .into());
        }

        self.progress(
            dependency,
            0,
            ProgressStage::Downloading,
            format!("Downloading {}", dependency.display_name()),
        );
        let events = Arc::clone(&self.events);
        let sink = ProgressSink::new(move |update| {
            let (Some(percent), Some(total)) = (update.percent(), update.total) else {
                return;
            };
            let message = format!(
                "Downloading {}: {} / {}",
                dependency.display_name(),
                format_bytes(update.downloaded),
                format_bytes(total)
            );
            events.publish(&ProvisionEvent::DownloadProgress(DownloadProgress::new(
                dependency,
                percent,
                ProgressStage::Downloading,
                message,
            )));
        });
        let policy = self.config.retry;
        let bytes = download_with_retry(
            self.transfer.as_ref(),
            url,
            artifact,
            &policy,
            &sink,
            |attempt, err, delay| {
                self.progress(
                    dependency,
                    0,
                    ProgressStage::Downloading,
                    format!(
                        "Download attempt {} of {} failed ({err}); retrying in {}ms",
                        attempt + 1,
                        policy.max_attempts(),
                        delay.as_millis()
                    ),
                );
            },
        )?;
        log::info!("downloaded {} ({})", url, format_bytes(bytes));
        Ok(())
    }

    fn verify_artifact(&self, descriptor: &DependencyDescriptor, artifact: &Path) -> Result<()> {
        let dependency = descriptor.dependency;
        let request = VerifyRequest::new(dependency.as_str(), artifact)
            .with_checksum(self.config.checksums.get(dependency))
            .with_source(&descriptor.download_url);
        let check = self.verifier.verify(&request)?;
        if check.quarantined {
            return Err(ProvisionError::Quarantined {
                dependency,
                issues: check.issue_strings(),
            });
        }
        if self.config.security.require_trusted_source && !check.source_valid {
            return Err(ProvisionError::Security {
                reason: format!(
                    "{} source is not trusted: {}",
                    dependency, descriptor.download_url
                ),
            });
        }
        Ok(())
    }

    fn validate_installed(&self, dependency: Dependency, target: &Utf8Path) -> Result<()> {
        if !is_executable(target.as_std_path()) {
            return Err(ProvisionError::Validation {
                dependency,
                reason: format!("{target} is not executable"),
            });
        }
        probe_version(
            target.as_std_path(),
            dependency.version_args(),
            self.config.version_timeout(),
        )
        .map(|report| {
            log::info!(
                "{} reports version {}",
                dependency.display_name(),
                report.version.as_deref().unwrap_or("unknown")
            );
        })
        .ok_or_else(|| ProvisionError::Validation {
            dependency,
            reason: "binary did not respond to version probe".to_owned(),
        })
    }

    fn progress(
        &self,
        dependency: Dependency,
        percent: u8,
        stage: ProgressStage,
        message: impl Into<String>,
    ) {
        self.events
            .publish(&ProvisionEvent::DownloadProgress(DownloadProgress::new(
                dependency, percent, stage, message,
            )));
    }

    /// Delete the `dependencies/` tree and re-check, leaving every
    /// dependency missing. The quarantine is left alone; releasing an
    /// entry is [`SecurityVerifier::release`].
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Io`] if the directory cannot be removed.
    pub fn cleanup_dependencies(&self) -> Result<DependencyStatus> {
        let dependencies_dir = self.layout.dependencies_dir();
        log::info!("removing managed dependencies {dependencies_dir}");
        remove_dir_if_present(dependencies_dir.as_std_path())?;
        lock(&self.outcomes).clear();
        *self
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        let status = self.check_dependencies();
        self.events.publish(&ProvisionEvent::DependenciesCleanedUp);
        Ok(status)
    }
}

fn locate_executable(
    extract_dir: &Path,
    descriptor: &DependencyDescriptor,
    config: &ProvisionerConfig,
) -> Result<PathBuf> {
    let dependency = descriptor.dependency;
    find_executable(extract_dir, &descriptor.executable_name, &config.search)
        .map_err(|err| ProvisionError::installation(dependency, err))?
        .ok_or_else(|| {
            ProvisionError::installation(
                dependency,
                format!(
                    "{} not found in {}",
                    descriptor.executable_name, descriptor.archive_filename
                ),
            )
        })
}

/// Copy `source` next to `target` and rename it into place, so the final
/// path never holds a partial binary.
fn install_executable(source: &Path, target: &Utf8Path) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::other(format!("{target} has no parent directory")))?;
    fs::create_dir_all(parent)?;
    let staged = tempfile::Builder::new()
        .prefix(STAGED_EXECUTABLE_PREFIX)
        .tempfile_in(parent)?
        .into_temp_path();
    fs::copy(source, &staged)?;
    make_executable(&staged)?;
    staged
        .persist(target)
        .map_err(|err| err.error)
}

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
