//! CLI argument definitions for the OTA updater.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use crate::config::Settings;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

/// Check for, stage, and install tagged releases of a code tree.
#[derive(Parser, Debug)]
#[command(name = "ota-updater")]
#[command(version, about)]
#[command(long_about = concat!(
    "Check for, stage, and install tagged releases of a code tree.\n\n",
    "The updater compares the tag recorded in the live tree with the release ",
    "marked latest in a GitHub repository. A different tag is downloaded into ",
    "a staging tree, which is then swapped in place of the live tree. The ",
    "previous tree is kept aside until the swap succeeds.\n\n",
    "Configuration is read from the --config file, then OTA_* environment ",
    "variables, then command-line flags.",
))]
#[command(after_help = concat!(
    "ENVIRONMENT:\n",
    "  OTA_REPO            Repository as owner/name or a GitHub URL\n",
    "  OTA_REPO_OWNER      Repository owner (with OTA_REPO_NAME)\n",
    "  OTA_REPO_NAME       Repository name (with OTA_REPO_OWNER)\n",
    "  OTA_ACCESS_TOKEN    Token for private repositories\n",
    "  OTA_SOURCE_DIR      Repository sub-directory holding the code tree\n",
    "  OTA_MODULE          Local directory holding the trees\n\n",
    "EXIT STATUS:\n",
    "  0  success, nothing installed\n",
    "  1  error\n",
    "  2  an update was installed; restart the device\n\n",
    "EXAMPLES:\n",
    "  Download a new release now and install it on the next boot:\n",
    "    $ ota-updater --repo acme/firmware check\n",
    "    $ ota-updater --repo acme/firmware resume\n\n",
    "  Only note the new release, download it on the next boot:\n",
    "    $ ota-updater --repo acme/firmware check --defer\n\n",
    "  Check, download, and install in one go:\n",
    "    $ ota-updater --repo acme/firmware update",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check for a new release and stage it.
    Check(CheckArgs),

    /// Install the staged release.
    Install,

    /// Recover, download, and install whatever a previous run left pending.
    Resume,

    /// Check, stage, and install in one step.
    Update,

    /// Show the live, staged, and pending tags.
    Status,
}

/// Arguments for the check command.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckArgs {
    /// Record the new tag as pending without downloading it.
    #[arg(long)]
    pub defer: bool,
}

/// Options accepted before or after any subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Directory holding the live, staging, and backup trees.
    #[arg(long, value_name = "DIR", global = true)]
    pub root: Option<Utf8PathBuf>,

    /// Release repository as owner/name or a GitHub URL.
    #[arg(long, value_name = "OWNER/NAME", global = true)]
    pub repo: Option<String>,

    /// Name of the live tree [default: app].
    #[arg(long, value_name = "NAME", global = true)]
    pub main_dir: Option<String>,

    /// Name of the staging tree [default: next].
    #[arg(long, value_name = "NAME", global = true)]
    pub staging_dir: Option<String>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet",
        global = true
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, conflicts_with = "verbosity", global = true)]
    pub quiet: bool,
}

impl GlobalArgs {
    /// The configuration layer given on the command line.
    ///
    /// # Examples
    ///
    /// ```
    /// use ota_updater::cli::GlobalArgs;
    ///
    /// let args = GlobalArgs {
    ///     repo: Some("acme/firmware".to_owned()),
    ///     ..GlobalArgs::default()
    /// };
    /// assert_eq!(args.settings().repo.as_deref(), Some("acme/firmware"));
    /// ```
    #[must_use]
    pub fn settings(&self) -> Settings {
        Settings {
            repo: self.repo.clone(),
            module: self.root.as_ref().map(ToString::to_string),
            main_dir: self.main_dir.clone(),
            staging_dir: self.staging_dir.clone(),
            ..Settings::default()
        }
    }

    /// Log level selected by `-v` and `-q`.
    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
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
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
