//! Unit tests for the dependency manager.
//!
//! The transfer layer is mocked; executables are shell scripts, so the
//! install-to-validation paths only run on unix.

use super::*;
use crate::security::{DigestAlgorithm, ExpectedChecksum};
use crate::test_utils::{sha256_hex, tar_xz_archive};
use crate::transfer::{MockTransfer, RetryPolicy, TransferProgress};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    root: Utf8PathBuf,
    manager: DependencyManager,
    events: Receiver<ProvisionEvent>,
}

impl Harness {
    fn new(transfer: MockTransfer) -> Self {
        Self::with_config(transfer, |_| {})
    }

    fn with_config(transfer: MockTransfer, edit: impl FnOnce(&mut ProvisionerConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().join("managed")).expect("utf8 root");
        let mut config = ProvisionerConfig {
            managed_root: Some(root.clone()),
            version_timeout_secs: 5,
            retry: RetryPolicy {
                max_retries: 2,
                base_delay_ms: 0,
                max_jitter_ms: 0,
            },
            ..ProvisionerConfig::default()
        };
        edit(&mut config);
        let platform = HostPlatform::from_parts("linux", "x86_64").expect("platform");
        let manager =
            DependencyManager::with_parts(config, platform, Box::new(transfer)).expect("manager");
        let events = manager.subscribe();
        Self {
            _dir: dir,
            root,
            manager,
            events,
        }
    }

    fn drain(&self) -> Vec<ProvisionEvent> {
        self.events.try_iter().collect()
    }

    fn leftover_temp_dirs(&self) -> usize {
        fs::read_dir(&self.root).map_or(0, |entries| {
            entries
                .filter_map(std::result::Result::ok)
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_string_lossy()
                        .starts_with(INSTALL_TEMP_PREFIX)
                })
                .count()
        })
    }
}

fn write_body(
    dest: &Path,
    body: &[u8],
    progress: &ProgressSink,
) -> std::result::Result<u64, DownloadError> {
    fs::write(dest, body)?;
    let len = u64::try_from(body.len()).expect("body length fits u64");
    progress.report(TransferProgress {
        downloaded: len,
        total: Some(len),
    });
    Ok(len)
}

fn serving(body: Vec<u8>) -> MockTransfer {
    let mut transfer = MockTransfer::new();
    transfer.expect_probe().return_const(true);
    transfer
        .expect_download()
        .returning(move |_, dest, progress| write_body(dest, &body, progress));
    transfer
}

fn ffmpeg_archive(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    tar_xz_archive(entries).expect("tar.xz archive")
}

fn status_updates(events: &[ProvisionEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ProvisionEvent::StatusUpdated(_)))
        .count()
}

fn progress_events(events: &[ProvisionEvent]) -> Vec<&DownloadProgress> {
    events
        .iter()
        .filter_map(|event| match event {
            ProvisionEvent::DownloadProgress(progress) => Some(progress),
            _ => None,
        })
        .collect()
}

#[test]
fn status_checks_are_idempotent_and_read_only() {
    let harness = Harness::new(MockTransfer::new());
    assert_eq!(
        harness.manager.dependency_state(Dependency::YtDlp),
        DependencyState::NotChecked
    );
    assert!(harness.manager.status().is_none());

    let first = harness.manager.check_dependencies();
    let second = harness.manager.check_dependencies();

    assert_eq!(first, second);
    assert!(!first.ytdlp.installed);
    assert_eq!(first.ffmpeg.error.as_deref(), Some("Dependency not found"));
    assert_eq!(
        first.ytdlp.path,
        harness.root.join("dependencies/ytdlp/bin/yt-dlp")
    );
    assert!(!harness.root.exists());
    assert_eq!(
        harness.manager.dependency_state(Dependency::Ffmpeg),
        DependencyState::Missing
    );
    assert!(!harness.manager.are_all_dependencies_ready());
    assert_eq!(status_updates(&harness.drain()), 2);
}

#[test]
fn initialize_creates_root_and_announces_readiness() {
    let harness = Harness::new(MockTransfer::new());

    let status = harness.manager.initialize().expect("initialize");

    assert!(harness.manager.is_initialized());
    assert!(harness.root.is_dir());
    assert!(harness.manager.layout().quarantine_dir().is_dir());
    assert_eq!(harness.manager.status(), Some(status));
    let events = harness.drain();
    assert!(matches!(
        events.as_slice(),
        [ProvisionEvent::StatusUpdated(_), ProvisionEvent::Initialized]
    ));
}

#[test]
fn inaccessible_url_fails_before_download() {
    let mut transfer = MockTransfer::new();
    transfer.expect_probe().times(1).return_const(false);
    transfer.expect_download().never();
    let harness = Harness::new(transfer);

    let err = harness
        .manager
        .install_dependency(Dependency::YtDlp)
        .expect_err("probe rejects the URL");

    assert!(matches!(
        err,
        ProvisionError::Download(DownloadError::Inaccessible { .. })
    ));
    assert_eq!(
        harness.manager.dependency_state(Dependency::YtDlp),
        DependencyState::Failed
    );
    assert_eq!(harness.leftover_temp_dirs(), 0);
    let events = harness.drain();
    assert_eq!(
        events.first(),
        Some(&ProvisionEvent::InstallStarted(Dependency::YtDlp))
    );
    assert!(matches!(
        events.last(),
        Some(ProvisionEvent::InstallFailed { dependency: Dependency::YtDlp, error })
            if error.contains("not accessible")
    ));
    assert_eq!(status_updates(&events), 0);
}

#[test]
fn checksum_mismatch_quarantines_the_artifact() {
    let harness = Harness::with_config(serving(b"tampered".to_vec()), |config| {
        let expected = ExpectedChecksum::new(DigestAlgorithm::Sha256, &sha256_hex(b"original"))
            .expect("checksum");
        config.checksums.set(Dependency::YtDlp, Some(expected));
    });

    let err = harness
        .manager
        .install_dependency(Dependency::YtDlp)
        .expect_err("checksum mismatch");

    match err {
        ProvisionError::Quarantined { dependency, issues } => {
            assert_eq!(dependency, Dependency::YtDlp);
            assert!(issues.contains(&"Checksum verification failed".to_owned()));
        }
        other => panic!("expected quarantine, got {other:?}"),
    }
    assert_eq!(
        harness.manager.verifier().quarantined().expect("list"),
        vec!["ytdlp"]
    );
    assert!(!harness.manager.dependency_path(Dependency::YtDlp).exists());
    assert_eq!(
        harness.manager.dependency_state(Dependency::YtDlp),
        DependencyState::Quarantined
    );
    assert_eq!(harness.leftover_temp_dirs(), 0);
}

#[test]
fn cleanup_keeps_quarantined_artifacts() {
    let harness = Harness::with_config(serving(b"tampered".to_vec()), |config| {
        let expected = ExpectedChecksum::new(DigestAlgorithm::Sha256, &sha256_hex(b"original"))
            .expect("checksum");
        config.checksums.set(Dependency::YtDlp, Some(expected));
    });
    harness
        .manager
        .install_dependency(Dependency::YtDlp)
        .expect_err("checksum mismatch");

    harness.manager.cleanup_dependencies().expect("cleanup");

    let verifier = harness.manager.verifier();
    assert_eq!(verifier.quarantined().expect("list"), vec!["ytdlp"]);
    assert!(verifier.quarantine().record("ytdlp").expect("record").is_some());
}

#[test]
fn finished_lease_is_retired_before_waiters_wake() {
    let harness = Harness::new(MockTransfer::new());
    let manager = &harness.manager;
    let flight = Arc::new(InFlight::default());
    lock(&manager.in_flight).insert(Dependency::YtDlp, Arc::clone(&flight));
    let lease = InstallLease {
        manager,
        dependency: Dependency::YtDlp,
        flight: Arc::clone(&flight),
    };

    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            let outcome = flight.wait();
            (outcome, lock(&manager.in_flight).contains_key(&Dependency::YtDlp))
        });
        lease.complete(Err(ProvisionError::installation(Dependency::YtDlp, "boom")));
        let (outcome, still_listed) = waiter.join().expect("waiter");
        assert!(outcome.is_err());
        assert!(!still_listed);
    });
}

#[test]
fn stale_lease_leaves_a_newer_install_in_place() {
    let harness = Harness::new(MockTransfer::new());
    let manager = &harness.manager;
    let stale = InstallLease {
        manager,
        dependency: Dependency::Ffmpeg,
        flight: Arc::new(InFlight::default()),
    };
    let current = Arc::new(InFlight::default());
    lock(&manager.in_flight).insert(Dependency::Ffmpeg, Arc::clone(&current));

    drop(stale);

    let table = lock(&manager.in_flight);
    let listed = table.get(&Dependency::Ffmpeg).expect("newer install listed");
    assert!(Arc::ptr_eq(listed, &current));
}

#[test]
fn untrusted_source_fails_when_policy_requires_trust() {
    let mirror = "https://downloads.example.net/yt-dlp";
    let mut transfer = MockTransfer::new();
    transfer.expect_probe().return_const(true);
    transfer
        .expect_download()
        .withf(move |url, _, _| url == mirror)
        .times(1)
        .returning(|_, dest, progress| write_body(dest, b"tool", progress));
    let harness = Harness::with_config(transfer, |config| {
        config.security.require_trusted_source = true;
        config.sources.set(Dependency::YtDlp, Some(mirror.to_owned()));
    });

    let err = harness
        .manager
        .install_dependency(Dependency::YtDlp)
        .expect_err("untrusted mirror");

    assert!(matches!(err, ProvisionError::Security { ref reason } if reason.contains(mirror)));
    assert!(harness.manager.verifier().quarantined().expect("list").is_empty());
    assert!(!harness.manager.dependency_path(Dependency::YtDlp).exists());
}

#[test]
fn archive_without_the_executable_is_an_installation_failure() {
    let body = ffmpeg_archive(&[("docs/readme.txt", b"no binaries here", 0o644)]);
    let harness = Harness::new(serving(body));

    let err = harness
        .manager
        .install_dependency(Dependency::Ffmpeg)
        .expect_err("missing executable");

    assert!(matches!(
        err,
        ProvisionError::Installation { dependency: Dependency::Ffmpeg, ref reason }
            if reason.contains("ffmpeg not found")
    ));
    assert_eq!(harness.leftover_temp_dirs(), 0);
}

#[test]
fn download_errors_are_retried_then_reported() {
    let mut transfer = MockTransfer::new();
    transfer.expect_probe().return_const(true);
    transfer.expect_download().times(3).returning(|url, _, _| {
        Err(DownloadError::Status {
            url: url.to_owned(),
            status: 503,
        })
    });
    let harness = Harness::new(transfer);

    let err = harness
        .manager
        .install_dependency(Dependency::YtDlp)
        .expect_err("every attempt fails");

    assert!(matches!(
        err,
        ProvisionError::Download(DownloadError::Status { status: 503, .. })
    ));
    let events = harness.drain();
    let retries = progress_events(&events)
        .into_iter()
        .filter(|progress| progress.message.contains("retrying"))
        .count();
    assert_eq!(retries, 2);
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::test_utils::fake_tool_script;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    const YTDLP_BANNER: &str = "2024.08.06";
    const FFMPEG_BANNER: &str =
        "ffmpeg version 7.0.1 Copyright (c) 2000-2024 the FFmpeg developers";

    #[test]
    fn installs_raw_executable_and_reports_ready() {
        let harness = Harness::new(serving(fake_tool_script(YTDLP_BANNER)));

        harness
            .manager
            .install_dependency(Dependency::YtDlp)
            .expect("install");

        let status = harness.manager.status().expect("status cached");
        assert!(status.ytdlp.installed);
        assert!(status.ytdlp.is_valid);
        assert_eq!(status.ytdlp.version.as_deref(), Some(YTDLP_BANNER));
        assert!(!status.ffmpeg.installed);
        assert_eq!(
            harness.manager.dependency_state(Dependency::YtDlp),
            DependencyState::Ready
        );
        assert_eq!(harness.leftover_temp_dirs(), 0);

        let events = harness.drain();
        assert_eq!(
            events.first(),
            Some(&ProvisionEvent::InstallStarted(Dependency::YtDlp))
        );
        assert_eq!(
            events.last(),
            Some(&ProvisionEvent::InstallCompleted(Dependency::YtDlp))
        );
        assert_eq!(status_updates(&events), 1);
        let progress = progress_events(&events);
        assert!(progress.iter().any(|p| {
            p.status == ProgressStage::Downloading && p.progress == 100
        }));
        assert!(progress.iter().any(|p| p.status == ProgressStage::Validating));
        assert!(!progress.iter().any(|p| p.status == ProgressStage::Extracting));
    }

    #[test]
    fn installs_ffmpeg_from_a_tar_xz_archive() {
        let script = fake_tool_script(FFMPEG_BANNER);
        let body = ffmpeg_archive(&[
            ("ffmpeg-7.0.1-amd64-static/readme.txt", b"docs", 0o644),
            ("ffmpeg-7.0.1-amd64-static/ffmpeg", &script, 0o755),
        ]);
        let harness = Harness::new(serving(body));

        harness
            .manager
            .install_dependency(Dependency::Ffmpeg)
            .expect("install");

        let info = harness
            .manager
            .dependency_status(Dependency::Ffmpeg)
            .expect("cached");
        assert!(info.is_ready());
        assert_eq!(info.version.as_deref(), Some("7.0.1"));
        assert_eq!(info.path, harness.root.join("dependencies/ffmpeg/bin/ffmpeg"));
        assert_eq!(harness.leftover_temp_dirs(), 0);
        let events = harness.drain();
        assert!(
            progress_events(&events)
                .iter()
                .any(|p| p.status == ProgressStage::Extracting)
        );
    }

    #[test]
    fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let script = fake_tool_script(YTDLP_BANNER);
        let mut transfer = MockTransfer::new();
        transfer.expect_probe().return_const(true);
        transfer
            .expect_download()
            .times(3)
            .returning(move |url, dest, progress| {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(DownloadError::Timeout {
                        url: url.to_owned(),
                    });
                }
                write_body(dest, &script, progress)
            });
        let harness = Harness::new(transfer);

        harness
            .manager
            .install_dependency(Dependency::YtDlp)
            .expect("third attempt succeeds");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(harness.manager.validate_dependency(Dependency::YtDlp));
    }

    #[test]
    fn unresponsive_binary_fails_validation() {
        let harness = Harness::new(serving(b"#!/bin/sh\nexit 3\n".to_vec()));

        let err = harness
            .manager
            .install_dependency(Dependency::YtDlp)
            .expect_err("binary prints nothing");

        assert!(matches!(
            err,
            ProvisionError::Validation {
                dependency: Dependency::YtDlp,
                ..
            }
        ));
        assert_eq!(
            harness.manager.dependency_state(Dependency::YtDlp),
            DependencyState::Failed
        );
    }

    #[test]
    fn reinstall_replaces_the_previous_install_directory() {
        let harness = Harness::new(serving(fake_tool_script(YTDLP_BANNER)));
        let stale = harness
            .manager
            .layout()
            .dependency_dir(Dependency::YtDlp)
            .join("stale.txt");
        fs::create_dir_all(stale.parent().expect("parent")).expect("mkdir");
        fs::write(&stale, b"old").expect("write stale");

        harness
            .manager
            .install_dependency(Dependency::YtDlp)
            .expect("install");

        assert!(!stale.exists());
        assert!(harness.manager.dependency_path(Dependency::YtDlp).is_file());
    }

    #[test]
    fn disabled_verification_skips_checksums() {
        let harness = Harness::with_config(serving(fake_tool_script(YTDLP_BANNER)), |config| {
            config.security.verify_downloads = false;
            let expected =
                ExpectedChecksum::new(DigestAlgorithm::Sha256, &sha256_hex(b"something else"))
                    .expect("checksum");
            config.checksums.set(Dependency::YtDlp, Some(expected));
        });

        harness
            .manager
            .install_dependency(Dependency::YtDlp)
            .expect("install without verification");

        assert!(harness.manager.verifier().all_security_checks().is_empty());
    }

    #[test]
    fn query_helpers_probe_the_installed_binary() {
        let harness = Harness::new(serving(fake_tool_script(YTDLP_BANNER)));
        harness
            .manager
            .install_dependency(Dependency::YtDlp)
            .expect("install");

        assert!(harness.manager.validate_dependency(Dependency::YtDlp));
        assert_eq!(
            harness.manager.dependency_version(Dependency::YtDlp).as_deref(),
            Some(YTDLP_BANNER)
        );
        assert!(!harness.manager.validate_dependency(Dependency::Ffmpeg));
        assert!(harness.manager.dependency_version(Dependency::Ffmpeg).is_none());
    }

    #[test]
    fn cleanup_removes_the_dependencies_tree() {
        let harness = Harness::new(serving(fake_tool_script(YTDLP_BANNER)));
        harness.manager.initialize().expect("initialize");
        harness
            .manager
            .install_dependency(Dependency::YtDlp)
            .expect("install");
        harness.drain();

        let status = harness.manager.cleanup_dependencies().expect("cleanup");

        assert!(!harness.root.join("dependencies").exists());
        assert!(!status.ytdlp.installed);
        assert!(!status.ffmpeg.installed);
        assert!(!harness.manager.are_all_dependencies_ready());
        let events = harness.drain();
        assert!(matches!(
            events.as_slice(),
            [
                ProvisionEvent::StatusUpdated(_),
                ProvisionEvent::DependenciesCleanedUp
            ]
        ));
        let after = harness.manager.check_dependencies();
        assert!(!after.ytdlp.installed);
        assert!(!harness.root.join("dependencies").exists());
    }

    #[test]
    fn installed_binary_leaves_no_staging_file() {
        let harness = Harness::new(serving(fake_tool_script(YTDLP_BANNER)));
        harness
            .manager
            .install_dependency(Dependency::YtDlp)
            .expect("install");

        let bin_dir = harness.manager.layout().bin_dir(Dependency::YtDlp);
        let names: Vec<String> = fs::read_dir(&bin_dir)
            .expect("bin dir")
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["yt-dlp".to_owned()]);
    }

    #[test]
    fn concurrent_installs_share_one_run() {
        let script = fake_tool_script(YTDLP_BANNER);
        let mut transfer = MockTransfer::new();
        transfer.expect_probe().times(1).return_const(true);
        transfer
            .expect_download()
            .times(1)
            .returning(move |_, dest, progress| {
                thread::sleep(Duration::from_millis(300));
                write_body(dest, &script, progress)
            });
        let harness = Harness::new(transfer);
        let manager = &harness.manager;

        let (first, second) = thread::scope(|scope| {
            let first = scope.spawn(|| manager.install_dependency(Dependency::YtDlp));
            thread::sleep(Duration::from_millis(50));
            assert_eq!(
                manager.dependency_state(Dependency::YtDlp),
                DependencyState::Installing
            );
            let second = scope.spawn(|| manager.install_dependency(Dependency::YtDlp));
            (
                first.join().expect("first thread"),
                second.join().expect("second thread"),
            )
        });

        first.expect("first install");
        second.expect("joined install");
        let events = harness.drain();
        let started = events
            .iter()
            .filter(|event| matches!(event, ProvisionEvent::InstallStarted(_)))
            .count();
        assert_eq!(started, 1);
    }
}
