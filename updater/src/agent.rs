//! The update state machine.
//!
//! [`UpdateAgent`] compares the live tag with the registry's latest tag,
//! mirrors a new release into the staging tree, and swaps staging for the
//! live tree. The swap moves the live tree aside to a backup first and only
//! deletes it once the new tree is in place, so a failed install can be
//! rolled back and an interrupted one recovered on the next boot.

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use crate::reclaim::{MemoryReclaim, NoopReclaim};
use crate::release::{EntryKind, ReleaseSource};
use crate::state::UpdateState;
use crate::tree::{MoveError, StreamError, TreeOps};
use crate::version::{VersionStore, VersionTag};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::VecDeque;
use std::fmt;

/// Snapshot of the trees on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Tag of the live tree.
    pub live: VersionTag,
    /// Tag recorded in the staging tree, if it carries a marker.
    pub staged: Option<VersionTag>,
    /// Whether the staging tree finished downloading.
    pub staging_complete: bool,
    /// Whether a backup tree is present.
    pub backup_present: bool,
}

impl Status {
    /// A staged tag that still has to be downloaded.
    #[must_use]
    pub fn pending(&self) -> Option<&VersionTag> {
        self.staged.as_ref().filter(|_| !self.staging_complete)
    }
}

/// The install step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwapStep {
    ClearBackup,
    /// Live was not moved; a partial backup copy may exist.
    LiveAside,
    /// Live was fully copied aside but only partly removed.
    LivePartlyRemoved,
    StagingIn,
    ClearSentinel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rollback {
    /// The previous tree never left live.
    LiveIntact,
    /// Live is whole; only a partial backup needs removing.
    DropPartialBackup,
    /// Replace whatever is in live with the complete backup.
    RestoreBackup,
}

/// Drives one device's check, stage, and install cycle.
///
/// The agent borrows its configuration and release source for its whole
/// lifetime. Every operation takes `&mut self`, so a single agent never runs
/// two cycles at once.
///
/// # Examples
///
/// ```no_run
/// use ota_updater::agent::UpdateAgent;
/// use ota_updater::config::UpdaterConfig;
/// use ota_updater::release::github::GithubReleaseSource;
///
/// let config = UpdaterConfig::new("acme/firmware".parse()?);
/// let source = GithubReleaseSource::new(&config);
/// let mut agent = UpdateAgent::new(&config, &source);
/// if agent.update_now()? {
///     println!("restart required");
/// }
/// # Ok::<(), ota_updater::error::UpdateError>(())
/// ```
pub struct UpdateAgent<'a> {
    config: &'a UpdaterConfig,
    source: &'a dyn ReleaseSource,
    reclaimer: &'a dyn MemoryReclaim,
    tree: TreeOps,
    versions: VersionStore,
    state: UpdateState,
}

impl<'a> UpdateAgent<'a> {
    /// Create an agent for `config` that fetches releases from `source`.
    #[must_use]
    pub fn new(config: &'a UpdaterConfig, source: &'a dyn ReleaseSource) -> Self {
        Self {
            config,
            source,
            reclaimer: &NoopReclaim,
            tree: TreeOps::new(config.module_root()),
            versions: VersionStore::new(config.version_file.as_str()),
            state: UpdateState::Idle,
        }
    }

    /// Invoke `reclaimer` after every downloaded entry.
    #[must_use]
    pub fn with_reclaimer(mut self, reclaimer: &'a dyn MemoryReclaim) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    /// Replace the tree operations, for example to force a move strategy.
    #[must_use]
    pub fn with_tree_ops(mut self, tree: TreeOps) -> Self {
        self.tree = tree;
        self
    }

    /// The state most recently entered.
    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Tag of the live tree.
    #[must_use]
    pub fn current_version(&self) -> VersionTag {
        self.versions.read(&self.config.live_path())
    }

    /// Report the tags and completeness of the trees on disk.
    #[must_use]
    pub fn status(&self) -> Status {
        let staging = self.config.staging_path();
        Status {
            live: self.current_version(),
            staged: self
                .versions
                .has_marker(&staging)
                .then(|| self.versions.read(&staging)),
            staging_complete: self.versions.is_complete(&staging),
            backup_present: self.tree.exists(&self.config.backup_path()),
        }
    }

    /// Check for a new release and download it into the staging tree.
    ///
    /// Returns `false` when the live tree already carries the latest tag.
    /// Otherwise returns `true` once a complete tree for the latest tag is
    /// staged. A staging tree that is already complete for that tag is
    /// reused without downloading.
    ///
    /// # Errors
    ///
    /// Propagates registry and filesystem failures unchanged. A failed
    /// download leaves a partial staging tree that the next run overwrites.
    pub fn check_and_stage(&mut self) -> Result<bool> {
        let Some(latest) = self.check()? else {
            return Ok(false);
        };
        if self.staged_complete(&latest) {
            self.enter(UpdateState::Staged, format_args!("{latest} already staged"));
            return Ok(true);
        }
        self.stage(&latest)?;
        Ok(true)
    }

    /// Check for a new release and record it as pending without
    /// downloading anything.
    ///
    /// [`Self::resume_after_reboot`] later downloads and installs it, which
    /// keeps HTTP buffers out of the boot that noticed the update.
    ///
    /// # Errors
    ///
    /// Propagates registry failures and failures writing the staging marker.
    pub fn mark_pending_for_next_boot(&mut self) -> Result<bool> {
        let Some(latest) = self.check()? else {
            return Ok(false);
        };
        if self.staged_complete(&latest) {
            self.enter(UpdateState::Staged, format_args!("{latest} already staged"));
            return Ok(true);
        }
        self.prepare_staging(&latest)?;
        log::info!("{latest} marked pending for next boot");
        Ok(true)
    }

    /// Swap the staged tree into place.
    ///
    /// Returns `false` when nothing is staged. On success the staging tree
    /// no longer exists and the live tree carries the staged tag; the caller
    /// is expected to restart.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::StagingIncomplete`] when the staging tree was
    /// never completed, and [`UpdateError::InstallFailed`] when the swap
    /// fails. The latter reports whether the previous live tree was put
    /// back. Returns [`UpdateError::Io`] when a backup left by an earlier
    /// interrupted install cannot be moved back into the empty live slot.
    pub fn install(&mut self) -> Result<bool> {
        let staging = self.config.staging_path();
        if !self.versions.has_marker(&staging) {
            log::info!("nothing staged in {staging}");
            return Ok(false);
        }
        let tag = self.versions.read(&staging);
        if !self.versions.is_complete(&staging) {
            return Err(UpdateError::StagingIncomplete { path: staging, tag });
        }

        let live = self.config.live_path();
        let backup = self.config.backup_path();
        if !self.tree.exists(&live) && self.tree.exists(&backup) {
            log::warn!("live tree missing; restoring {backup} before installing");
            self.move_backup_into_live(&live, &backup)?;
        }
        let had_live = self.tree.exists(&live);
        let previous = self.current_version();
        self.enter(UpdateState::Installing, format_args!("{previous} -> {tag}"));

        if let Err((step, err)) = self.swap_in(&staging, &live, &backup, had_live) {
            let rolled_back = self.roll_back(step, &live, &backup, had_live);
            self.enter(
                UpdateState::InstallFailed,
                format_args!("{tag} not installed; {previous} restored: {rolled_back}"),
            );
            return Err(UpdateError::InstallFailed {
                tag,
                rolled_back,
                source: Box::new(err),
            });
        }

        self.enter(UpdateState::Installed, format_args!("{previous} -> {tag}"));
        if had_live {
            if let Err(e) = self.tree.delete_tree(&backup) {
                log::warn!("installed {tag} but could not remove backup {backup}: {e}");
            }
        }
        Ok(true)
    }

    /// Finish whatever a previous boot left pending.
    ///
    /// Recovers an interrupted install first. Then, if the staging tree
    /// carries a marker, downloads it when incomplete and installs it. No
    /// registry request is made unless a download is pending.
    ///
    /// # Errors
    ///
    /// Propagates recovery, download, and install failures.
    pub fn resume_after_reboot(&mut self) -> Result<bool> {
        self.recover_interrupted_install()?;
        let staging = self.config.staging_path();
        if !self.versions.has_marker(&staging) {
            log::info!("no pending update");
            return Ok(false);
        }
        let tag = self.versions.read(&staging);
        if self.versions.is_complete(&staging) {
            self.enter(UpdateState::Staged, format_args!("{tag} staged before reboot"));
        } else {
            log::info!("resuming download of {tag}");
            self.stage(&tag)?;
        }
        self.install()
    }

    /// Check, stage, and install in one call.
    ///
    /// Returns whether a new tree was installed.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Self::check_and_stage`] and
    /// [`Self::install`].
    pub fn update_now(&mut self) -> Result<bool> {
        if !self.check_and_stage()? {
            return Ok(false);
        }
        self.install()
    }

    fn enter(&mut self, next: UpdateState, detail: fmt::Arguments<'_>) {
        log::info!("{} -> {next}: {detail}", self.state);
        self.state = next;
    }

    fn check(&mut self) -> Result<Option<VersionTag>> {
        let current = self.current_version();
        self.enter(UpdateState::Checking, format_args!("live tree at {current}"));
        let latest = self.source.latest_tag()?;
        if latest == current {
            self.enter(UpdateState::UpToDate, format_args!("{current} is latest"));
            self.discard_superseded_staging()?;
            return Ok(None);
        }
        log::info!("update available: {current} -> {latest}");
        Ok(Some(latest))
    }

    /// Drop a staging tree left for another tag once live is already at
    /// the latest one, so a later resume does not install it.
    fn discard_superseded_staging(&self) -> Result<()> {
        let staging = self.config.staging_path();
        if self.tree.exists(&staging) {
            log::info!("live tree is latest; discarding staging tree {staging}");
            self.tree.delete_tree(&staging)?;
        }
        Ok(())
    }

    fn staged_complete(&self, tag: &VersionTag) -> bool {
        let staging = self.config.staging_path();
        self.versions.has_marker(&staging)
            && self.versions.is_complete(&staging)
            && self.versions.read(&staging) == *tag
    }

    /// Record `tag` in staging before any download, dropping leftovers of
    /// a different tag.
    fn prepare_staging(&self, tag: &VersionTag) -> Result<Utf8PathBuf> {
        let staging = self.config.staging_path();
        if self.tree.exists(&staging) && self.versions.read(&staging) != *tag {
            log::info!("discarding stale staging tree {staging}");
            self.tree.delete_tree(&staging)?;
        }
        self.versions.write(&staging, tag)?;
        self.versions.clear_complete(&staging)?;
        Ok(staging)
    }

    fn stage(&mut self, tag: &VersionTag) -> Result<()> {
        self.enter(UpdateState::StagingDownload, format_args!("fetching {tag}"));
        match self.download(tag) {
            Ok(files) => {
                self.enter(UpdateState::Staged, format_args!("{tag} ({files} files)"));
                Ok(())
            }
            Err(e) => {
                self.enter(UpdateState::StagingFailed, format_args!("{tag}: {e}"));
                Err(e)
            }
        }
    }

    fn download(&self, tag: &VersionTag) -> Result<usize> {
        let staging = self.prepare_staging(tag)?;
        let remote_root = self.config.remote_root();
        let mut pending = VecDeque::from([remote_root.clone()]);
        let mut files = 0;
        while let Some(dir) = pending.pop_front() {
            for entry in self.source.list_entries(tag, &dir)? {
                let local = staging.join(relative_entry_path(&remote_root, &entry.path)?);
                match entry.kind {
                    EntryKind::Directory => {
                        self.tree.make_path(&local)?;
                        pending.push_back(entry.path);
                    }
                    EntryKind::File => {
                        let bytes = self.fetch_into(tag, &entry.path, &local)?;
                        log::debug!("fetched {} ({bytes} bytes)", entry.path);
                        files += 1;
                    }
                }
                self.reclaimer.reclaim();
            }
        }
        self.carry_secrets(&staging)?;
        self.versions.mark_complete(&staging)?;
        Ok(files)
    }

    fn fetch_into(&self, tag: &VersionTag, remote: &str, local: &Utf8Path) -> Result<u64> {
        if let Some(parent) = local.parent() {
            self.tree.make_path(parent)?;
        }
        let mut body = self.source.fetch_file(tag, remote)?;
        self.tree
            .write_stream(&mut *body, local)
            .map_err(|e| match e {
                StreamError::Read(source) => UpdateError::Network {
                    url: remote.to_owned(),
                    reason: format!("download interrupted: {source}"),
                },
                StreamError::Write(source) => UpdateError::io("write", local)(source),
            })
    }

    fn carry_secrets(&self, staging: &Utf8Path) -> Result<()> {
        let Some(name) = self.config.secrets_file.as_deref() else {
            return Ok(());
        };
        let from = self.config.live_path().join(name);
        if !from.is_file() {
            log::debug!("no secrets file at {from}");
            return Ok(());
        }
        self.tree.copy_file(&from, &staging.join(name))?;
        log::debug!("carried {name} into {staging}");
        Ok(())
    }

    fn swap_in(
        &self,
        staging: &Utf8Path,
        live: &Utf8Path,
        backup: &Utf8Path,
        had_live: bool,
    ) -> std::result::Result<(), (SwapStep, UpdateError)> {
        if had_live && self.tree.exists(backup) {
            log::warn!("removing stale backup {backup}");
            self.tree
                .delete_tree(backup)
                .map_err(|e| (SwapStep::ClearBackup, e))?;
        }
        if had_live {
            self.tree
                .rename_or_fallback(live, backup)
                .map_err(|e| match e {
                    MoveError::NotMoved(e) => (SwapStep::LiveAside, e),
                    MoveError::SourceLeft(e) => (SwapStep::LivePartlyRemoved, e),
                })?;
        }
        match self.tree.rename_or_fallback(staging, live) {
            Ok(()) => {}
            Err(MoveError::NotMoved(e)) => return Err((SwapStep::StagingIn, e)),
            Err(MoveError::SourceLeft(e)) => {
                // Live already holds the complete new tree.
                log::warn!("installed tree is complete but {staging} was not removed: {e}");
                if let Err(e) = self.versions.clear_complete(staging) {
                    log::warn!("could not clear completion sentinel in {staging}: {e}");
                }
            }
        }
        self.versions
            .clear_complete(live)
            .map_err(|e| (SwapStep::ClearSentinel, e))
    }

    /// Put the previous live tree back after a failed swap. Returns whether
    /// it is in place afterwards.
    fn roll_back(
        &self,
        step: SwapStep,
        live: &Utf8Path,
        backup: &Utf8Path,
        had_live: bool,
    ) -> bool {
        if !had_live {
            return false;
        }
        match rollback_plan(step) {
            Rollback::LiveIntact => true,
            Rollback::DropPartialBackup => {
                if self.tree.exists(backup) && self.tree.delete_tree(backup).is_err() {
                    log::warn!("partial backup {backup} left in place");
                }
                true
            }
            Rollback::RestoreBackup => self.restore_backup(live, backup),
        }
    }

    fn restore_backup(&self, live: &Utf8Path, backup: &Utf8Path) -> bool {
        match self.replace_live_with_backup(live, backup) {
            Ok(()) => {
                log::warn!("restored previous tree from {backup}");
                true
            }
            Err(e) => {
                log::error!("could not restore {backup} to {live}: {e}; backup left for recovery");
                false
            }
        }
    }

    fn replace_live_with_backup(&self, live: &Utf8Path, backup: &Utf8Path) -> Result<()> {
        if self.tree.exists(live) {
            self.tree.delete_tree(live)?;
        }
        self.move_backup_into_live(live, backup)
    }

    /// Move `backup` into the empty `live` slot.
    ///
    /// A copy that stops part-way is removed again so the backup stays the
    /// only candidate for the next recovery.
    fn move_backup_into_live(&self, live: &Utf8Path, backup: &Utf8Path) -> Result<()> {
        match self.tree.rename_or_fallback(backup, live) {
            Ok(()) => Ok(()),
            Err(MoveError::SourceLeft(e)) => {
                log::warn!("restored {live} but could not remove {backup}: {e}");
                Ok(())
            }
            Err(MoveError::NotMoved(e)) => {
                if self.tree.exists(live) && self.tree.delete_tree(live).is_err() {
                    log::error!("partial copy of {backup} left in {live}");
                }
                Err(e)
            }
        }
    }

    /// Resolve the unambiguous leftovers of an install cut short by a
    /// reboot.
    fn recover_interrupted_install(&self) -> Result<()> {
        let backup = self.config.backup_path();
        if !self.tree.exists(&backup) {
            return Ok(());
        }
        let live = self.config.live_path();
        let staging = self.config.staging_path();
        if !self.tree.exists(&live) {
            log::warn!("live tree missing; restoring {backup}");
            self.move_backup_into_live(&live, &backup)?;
        } else if self.versions.has_marker(&live) && !self.tree.exists(&staging) {
            log::info!("install completed before reboot; removing {backup}");
            self.tree.delete_tree(&backup)?;
        } else {
            log::warn!("backup {backup} left in place: live and staging trees are ambiguous");
        }
        Ok(())
    }
}

/// What a failed swap step leaves behind, and so how to undo it.
fn rollback_plan(step: SwapStep) -> Rollback {
    match step {
        SwapStep::ClearBackup => Rollback::LiveIntact,
        SwapStep::LiveAside => Rollback::DropPartialBackup,
        SwapStep::LivePartlyRemoved | SwapStep::StagingIn | SwapStep::ClearSentinel => {
            Rollback::RestoreBackup
        }
    }
}

/// Map a remote entry path onto a path relative to the staging root.
///
/// The entry must sit under `remote_root` and may not climb out of it.
fn relative_entry_path(remote_root: &str, entry_path: &str) -> Result<Utf8PathBuf> {
    let unexpected = |reason: String| UpdateError::UnexpectedResponse {
        url: entry_path.to_owned(),
        reason,
    };
    let relative = if remote_root.is_empty() {
        Some(entry_path)
    } else {
        entry_path
            .strip_prefix(remote_root)
            .and_then(|rest| rest.strip_prefix('/'))
    }
    .ok_or_else(|| unexpected(format!("entry lies outside {remote_root:?}")))?;

    let mut path = Utf8PathBuf::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." | ".." => {
                return Err(unexpected(format!(
                    "entry path segment {segment:?} is not allowed"
                )));
            }
            s if s.contains('\\') => {
                return Err(unexpected(format!("entry path segment {s:?} is not portable")));
            }
            s => path.push(s),
        }
    }
    Ok(path)
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
