//! CLI argument definitions for the `mediadeps` binary.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use crate::dependency::Dependency;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use log::LevelFilter;

/// Provision the yt-dlp and FFmpeg binaries.
#[derive(Parser, Debug)]
#[command(name = "mediadeps")]
#[command(version, about)]
#[command(long_about = concat!(
    "Provision the yt-dlp and FFmpeg binaries.\n\n",
    "mediadeps downloads the build matching the host platform, verifies it ",
    "against configured checksums and trusted sources, unpacks archives, and ",
    "installs the executable into a managed directory. Artifacts that fail a ",
    "critical check are moved into quarantine instead of being installed.",
))]
#[command(after_help = concat!(
    "DEPENDENCIES:\n",
    "  ytdlp     yt-dlp, the media metadata and download tool\n",
    "  ffmpeg    FFmpeg, the media transcoder\n\n",
    "EXAMPLES:\n",
    "  Show what is installed:\n",
    "    $ mediadeps check\n\n",
    "  Install everything into a custom root:\n",
    "    $ mediadeps --root /opt/mediadeps install --all\n\n",
    "  Print the path of the installed ffmpeg:\n",
    "    $ mediadeps path ffmpeg\n\n",
    "  Inspect quarantined artifacts:\n",
    "    $ mediadeps quarantine list",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Managed root directory [default: platform-specific].
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<Utf8PathBuf>,

    /// TOML configuration file.
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        global = true,
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, global = true, conflicts_with = "verbosity")]
    pub quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Report whether each dependency is installed and working.
    Check(CheckArgs),

    /// Download, verify, and install dependencies.
    Install(InstallArgs),

    /// Print where a dependency's executable lives.
    Path {
        /// Dependency to locate.
        #[arg(value_name = "DEPENDENCY")]
        dependency: Dependency,
    },

    /// Print the version an installed dependency reports.
    Version {
        /// Dependency to probe.
        #[arg(value_name = "DEPENDENCY")]
        dependency: Dependency,
    },

    /// Remove every installed dependency. Quarantined artifacts are kept.
    Cleanup,

    /// Inspect or release quarantined artifacts.
    Quarantine {
        /// Quarantine action.
        #[command(subcommand)]
        action: QuarantineCommand,
    },

    /// Print the security report as JSON.
    Report,
}

/// Arguments for the check command.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct CheckArgs {
    /// Output in JSON format for scripting.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the install command.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct InstallArgs {
    /// Dependency to install.
    #[arg(
        value_name = "DEPENDENCY",
        required_unless_present = "all",
        conflicts_with = "all"
    )]
    pub dependency: Option<Dependency>,

    /// Install every managed dependency.
    #[arg(long)]
    pub all: bool,

    /// Print the security report as JSON once installs finish.
    #[arg(long)]
    pub report: bool,
}

/// Quarantine subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum QuarantineCommand {
    /// List quarantined artifacts and the issues recorded against them.
    List,

    /// Delete a quarantined artifact.
    Release {
        /// Quarantine entry name, as shown by `quarantine list`.
        #[arg(value_name = "NAME")]
        name: String,
    },
}

impl InstallArgs {
    /// The dependencies this invocation installs, in status order.
    #[must_use]
    pub fn targets(&self) -> Vec<Dependency> {
        if self.all {
            Dependency::ALL.to_vec()
        } else {
            self.dependency.into_iter().collect()
        }
    }
}

impl Cli {
    /// The log level implied by `-q` and `-v`.
    ///
    /// # Examples
    ///
    /// ```
    /// use clap::Parser;
    /// use log::LevelFilter;
    /// use mediadeps_provisioner::cli::Cli;
    ///
    /// let cli = Cli::parse_from(["mediadeps", "-vv", "check"]);
    /// assert_eq!(cli.log_level(), LevelFilter::Debug);
    /// ```
    #[must_use]
    pub const fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Whether install progress should be rendered.
    #[must_use]
    pub const fn shows_progress(&self) -> bool {
        !self.quiet
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
