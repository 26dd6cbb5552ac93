//! Output formatting for the updater CLI.
//!
//! User-facing lines go to stderr so that scripts wrapping the binary can
//! rely on the exit code alone.

use crate::agent::Status;
use crate::config::UpdaterConfig;
use std::fmt::Display;
use std::io::Write;

/// Write `message` and a newline to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort output; ignore write failures.
    }
}

/// Describe the trees on disk.
///
/// # Example
///
/// ```
/// use ota_updater::agent::Status;
/// use ota_updater::config::UpdaterConfig;
/// use ota_updater::output::status_text;
/// use ota_updater::version::VersionTag;
///
/// let config = UpdaterConfig::new("acme/fw".parse().expect("valid repo"));
/// let status = Status {
///     live: VersionTag::from("v1.0"),
///     staged: Some(VersionTag::from("v2.0")),
///     staging_complete: false,
///     backup_present: false,
/// };
/// let text = status_text(&status, &config);
/// assert!(text.contains("v2.0 (download pending)"));
/// ```
#[must_use]
pub fn status_text(status: &Status, config: &UpdaterConfig) -> String {
    let staged = match (&status.staged, status.staging_complete) {
        (None, _) => "none".to_owned(),
        (Some(tag), true) => format!("{tag} (ready to install)"),
        (Some(tag), false) => format!("{tag} (download pending)"),
    };
    let mut lines = vec![
        format!("Repository: {}", config.repo),
        format!("Live ({}): {}", config.live_path(), status.live),
        format!("Staged ({}): {staged}", config.staging_path()),
    ];
    if status.backup_present {
        lines.push(format!(
            "Backup ({}): present; run `resume` to recover",
            config.backup_path()
        ));
    }
    lines.join("\n")
}

/// Message printed after a new tree was swapped in.
#[must_use]
pub fn restart_message(status: &Status) -> String {
    format!("Installed {}. Restart the device to run it.", status.live)
}
