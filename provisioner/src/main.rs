//! `mediadeps` CLI entrypoint.
//!
//! This binary provisions the yt-dlp and FFmpeg executables into a managed
//! directory and reports their status. Install progress is rendered to stderr
//! by a thread subscribed to the manager's events.

use clap::Parser;
use log::LevelFilter;
use mediadeps_provisioner::cli::{Cli, Command, InstallArgs, QuarantineCommand};
use mediadeps_provisioner::config::ProvisionerConfig;
use mediadeps_provisioner::dependency::Dependency;
use mediadeps_provisioner::error::{ProvisionError, Result};
use mediadeps_provisioner::events::ProvisionEvent;
use mediadeps_provisioner::manager::DependencyManager;
use mediadeps_provisioner::status::{DependencyInfo, DependencyStatus};
use serde::Serialize;
use std::io::{self, Write};
use std::sync::mpsc::Receiver;
use std::thread;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter as TraceLevel;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level());
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let run_result = run(&cli, &mut stdout, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Installs a stderr subscriber; `RUST_LOG` directives override `level`.
fn init_logging(level: LevelFilter) {
    let default = match level {
        LevelFilter::Off => TraceLevel::OFF,
        LevelFilter::Error => TraceLevel::ERROR,
        LevelFilter::Warn => TraceLevel::WARN,
        LevelFilter::Info => TraceLevel::INFO,
        LevelFilter::Debug => TraceLevel::DEBUG,
        LevelFilter::Trace => TraceLevel::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<()> {
    let config = load_config(cli)?;
    let manager = DependencyManager::new(config)?;

    match &cli.command {
        Command::Check(args) => {
            let status = manager.check_dependencies();
            if args.json {
                write_json(stdout, &status)
            } else {
                print_status(&status, stdout);
                Ok(())
            }
        }
        Command::Install(args) => run_install(manager, args, cli.shows_progress(), stdout, stderr),
        Command::Path { dependency } => {
            write_line(stdout, manager.dependency_path(*dependency));
            Ok(())
        }
        Command::Version { dependency } => run_version(&manager, *dependency, stdout),
        Command::Cleanup => {
            let status = manager.cleanup_dependencies()?;
            write_line(stdout, format!("Removed {}", manager.layout().dependencies_dir()));
            print_status(&status, stdout);
            Ok(())
        }
        Command::Quarantine { action } => run_quarantine(&manager, action, stdout),
        Command::Report => write_json(stdout, &manager.verifier().report()),
    }
}

/// Reads the configuration file, if any, then applies `--root`.
fn load_config(cli: &Cli) -> Result<ProvisionerConfig> {
    let mut config = match &cli.config {
        Some(path) => ProvisionerConfig::load(path)?,
        None => ProvisionerConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.managed_root = Some(root.clone());
    }
    Ok(config)
}

fn run_install(
    manager: DependencyManager,
    args: &InstallArgs,
    show_progress: bool,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<()> {
    let renderer = show_progress.then(|| {
        let events = manager.subscribe();
        thread::spawn(move || render_events(&events, &mut io::stderr()))
    });

    let outcome = install_targets(&manager, &args.targets());
    let report = manager.verifier().report();
    let status = manager.status();

    // The renderer exits once the manager's senders are gone.
    drop(manager);
    if renderer.is_some_and(|handle| handle.join().is_err()) {
        write_line(stderr, "progress renderer panicked");
    }

    if let Some(status) = &status {
        print_status(status, stdout);
    }
    if args.report {
        write_json(stdout, &report)?;
    }
    outcome
}

fn install_targets(manager: &DependencyManager, targets: &[Dependency]) -> Result<()> {
    manager.initialize()?;
    for &dependency in targets {
        manager.install_dependency(dependency)?;
    }
    Ok(())
}

fn run_version(
    manager: &DependencyManager,
    dependency: Dependency,
    stdout: &mut dyn Write,
) -> Result<()> {
    match manager.dependency_version(dependency) {
        Some(version) => write_line(stdout, version),
        None if manager.validate_dependency(dependency) => {
            write_line(stdout, "unknown (binary responded without a version)");
        }
        None => {
            return Err(ProvisionError::Validation {
                dependency,
                reason: format!("{} is not installed or not working", dependency.display_name()),
            });
        }
    }
    Ok(())
}

fn run_quarantine(
    manager: &DependencyManager,
    action: &QuarantineCommand,
    stdout: &mut dyn Write,
) -> Result<()> {
    let verifier = manager.verifier();
    match action {
        QuarantineCommand::List => {
            let names = verifier.quarantined()?;
            if names.is_empty() {
                write_line(stdout, "No quarantined artifacts.");
            }
            for name in names {
                match verifier.quarantine().record(&name)? {
                    Some(record) => write_line(
                        stdout,
                        format!(
                            "{name}\t{}\t{}",
                            record.quarantined_at.to_rfc3339(),
                            record.security_issues.join("; ")
                        ),
                    ),
                    None => write_line(stdout, name),
                }
            }
            Ok(())
        }
        QuarantineCommand::Release { name } => {
            verifier.release(name)?;
            write_line(stdout, format!("Released {name}"));
            Ok(())
        }
    }
}

/// Writes progress lines until every sender is dropped.
fn render_events(events: &Receiver<ProvisionEvent>, out: &mut dyn Write) {
    for event in events {
        if let Some(line) = progress_line(&event) {
            write_line(out, line);
        }
    }
}

fn progress_line(event: &ProvisionEvent) -> Option<String> {
    match event {
        ProvisionEvent::InstallStarted(dependency) => {
            Some(format!("Installing {}...", dependency.display_name()))
        }
        ProvisionEvent::DownloadProgress(progress) => Some(format!(
            "  [{}] {:>3}% {}: {}",
            progress.dependency, progress.progress, progress.status, progress.message
        )),
        ProvisionEvent::InstallCompleted(dependency) => {
            Some(format!("{} installed.", dependency.display_name()))
        }
        ProvisionEvent::InstallFailed { dependency, error } => Some(format!(
            "{} failed: {error}",
            dependency.display_name()
        )),
        ProvisionEvent::Initialized
        | ProvisionEvent::StatusUpdated(_)
        | ProvisionEvent::DependenciesCleanedUp => None,
    }
}

fn print_status(status: &DependencyStatus, stdout: &mut dyn Write) {
    for info in status.iter() {
        write_line(stdout, status_line(info));
    }
}

fn status_line(info: &DependencyInfo) -> String {
    let detail = match (&info.version, &info.error) {
        (Some(version), _) => version.as_str(),
        (None, Some(error)) => error.as_str(),
        (None, None) => "-",
    };
    format!(
        "{:<8}{:<10}{:<24}{}",
        info.name.as_str(),
        info.state().to_string(),
        detail,
        info.path
    )
}

fn write_json(stdout: &mut dyn Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *stdout, value).map_err(io::Error::from)?;
    writeln!(stdout)?;
    Ok(())
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_line(stderr, format!("error: {err}"));
            1
        }
    }
}

fn write_line(out: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(out, "{message}").is_err() {
        // Best-effort output; ignore write failures.
    }
}
