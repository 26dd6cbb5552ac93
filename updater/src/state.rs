//! Update cycle states.

use std::fmt;

/// Where the agent is in its check, stage, and install cycle.
///
/// The agent records the state it last entered; every transition is logged
/// at info level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    /// No operation has run yet.
    #[default]
    Idle,
    /// Comparing the live tag with the registry's latest tag.
    Checking,
    /// The live tree already carries the latest tag.
    UpToDate,
    /// Mirroring the remote tree into staging.
    StagingDownload,
    /// The download failed part-way; staging is incomplete.
    StagingFailed,
    /// A complete tree is staged and awaits install.
    Staged,
    /// Swapping staging into place.
    Installing,
    /// The staged tree is live. The device must restart.
    Installed,
    /// The swap failed.
    InstallFailed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::UpToDate => "up to date",
            Self::StagingDownload => "downloading",
            Self::StagingFailed => "staging failed",
            Self::Staged => "staged",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::InstallFailed => "install failed",
        };
        f.write_str(label)
    }
}
