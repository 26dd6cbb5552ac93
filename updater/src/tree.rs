//! Directory-tree primitives used to stage and swap code trees.
//!
//! Everything here is synchronous and streams file content in small fixed
//! chunks so that peak memory stays bounded on small devices. Recursive
//! walks use explicit worklists rather than call recursion. None of the
//! multi-file operations are atomic: a failure part-way leaves whatever was
//! already copied or removed in place.

use crate::error::{Result, UpdateError};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::sync::OnceLock;

/// Number of bytes moved per read/write when streaming file content.
pub const CHUNK_SIZE: usize = 512;

/// Scratch directory names used by the rename capability probe.
const PROBE_DIR: &str = ".ota-rename-probe";
const PROBED_DIR: &str = ".ota-rename-probed";
const PROBE_CHILD: &str = "child";

/// Process-wide result of the rename capability probe.
static PROBED_STRATEGY: OnceLock<MoveStrategy> = OnceLock::new();

/// How a directory is moved from one path to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStrategy {
    /// The filesystem renames directories atomically.
    Rename,
    /// Copy the tree, then delete the source.
    CopyThenDelete,
}

/// Failure of a streaming copy, split by which side failed.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Reading the source failed.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    /// Creating, writing, or syncing the destination failed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
}

/// Failure of a tree move, split by how far the move got.
#[derive(Debug, thiserror::Error)]
pub enum MoveError {
    /// The source is untouched. The destination may hold a partial copy.
    #[error(transparent)]
    NotMoved(UpdateError),
    /// The destination holds a complete copy but only part of the source
    /// was removed.
    #[error(transparent)]
    SourceLeft(UpdateError),
}

impl MoveError {
    /// The underlying failure, whichever phase it came from.
    #[must_use]
    pub fn into_inner(self) -> UpdateError {
        match self {
            Self::NotMoved(e) | Self::SourceLeft(e) => e,
        }
    }
}

impl From<MoveError> for UpdateError {
    fn from(e: MoveError) -> Self {
        e.into_inner()
    }
}

/// Recursive directory operations over the local filesystem.
#[derive(Debug, Clone)]
pub struct TreeOps {
    probe_root: Utf8PathBuf,
    forced: Option<MoveStrategy>,
}

impl TreeOps {
    /// Create tree operations that probe for rename support under
    /// `probe_root` the first time a move is needed.
    #[must_use]
    pub fn new(probe_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            probe_root: probe_root.into(),
            forced: None,
        }
    }

    /// Create tree operations that always use `strategy` and never probe.
    #[must_use]
    pub fn with_strategy(strategy: MoveStrategy) -> Self {
        Self {
            probe_root: Utf8PathBuf::new(),
            forced: Some(strategy),
        }
    }

    /// The move strategy in effect, probing the filesystem on first use.
    ///
    /// The probe result is cached for the rest of the process.
    #[must_use]
    pub fn move_strategy(&self) -> MoveStrategy {
        self.forced.unwrap_or_else(|| {
            *PROBED_STRATEGY.get_or_init(|| probe_rename_support(&self.probe_root))
        })
    }

    /// Whether `path` is a listable directory. Never fails.
    #[must_use]
    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.read_dir_utf8().is_ok()
    }

    /// Create `path` and every missing ancestor.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if any segment cannot be created, for
    /// example because a file already occupies its name.
    pub fn make_path(&self, path: &Utf8Path) -> Result<()> {
        fs::create_dir_all(path).map_err(UpdateError::io("create", path))
    }

    /// Stream `from` into `to` in [`CHUNK_SIZE`] chunks.
    ///
    /// A partially written `to` may remain after a failure.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if either file cannot be opened or any
    /// read or write fails.
    pub fn copy_file(&self, from: &Utf8Path, to: &Utf8Path) -> Result<u64> {
        let mut source = fs::File::open(from).map_err(UpdateError::io("open", from))?;
        self.write_stream(&mut source, to).map_err(|e| match e {
            StreamError::Read(source) => UpdateError::io("read", from)(source),
            StreamError::Write(source) => UpdateError::io("write", to)(source),
        })
    }

    /// Stream everything `reader` yields into a new file at `to`.
    ///
    /// The destination is truncated first and synced to storage once the
    /// reader is exhausted. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Read`] when the reader fails and
    /// [`StreamError::Write`] when the destination cannot be written.
    pub fn write_stream(
        &self,
        reader: &mut dyn Read,
        to: &Utf8Path,
    ) -> std::result::Result<u64, StreamError> {
        let mut file = fs::File::create(to).map_err(StreamError::Write)?;
        let mut buffer = [0_u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(StreamError::Read(e)),
            };
            let chunk = buffer.get(..read).unwrap_or_default();
            file.write_all(chunk).map_err(StreamError::Write)?;
            total += read as u64;
        }
        file.sync_all().map_err(StreamError::Write)?;
        Ok(total)
    }

    /// Mirror the tree under `from` into `to`, overwriting existing files.
    ///
    /// Stops at the first failing entry without undoing earlier copies.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] for the first entry that cannot be
    /// listed, created, or copied.
    pub fn copy_tree(&self, from: &Utf8Path, to: &Utf8Path) -> Result<()> {
        let mut pending = vec![(from.to_owned(), to.to_owned())];
        while let Some((source_dir, dest_dir)) = pending.pop() {
            self.make_path(&dest_dir)?;
            for entry in source_dir
                .read_dir_utf8()
                .map_err(UpdateError::io("list", &source_dir))?
            {
                let entry = entry.map_err(UpdateError::io("list", &source_dir))?;
                let file_type = entry
                    .file_type()
                    .map_err(UpdateError::io("inspect", entry.path()))?;
                let dest = dest_dir.join(entry.file_name());
                if file_type.is_dir() {
                    pending.push((entry.path().to_owned(), dest));
                } else {
                    log::trace!("copying {} to {dest}", entry.path());
                    self.copy_file(entry.path(), &dest)?;
                }
            }
        }
        Ok(())
    }

    /// Remove every file, then every emptied directory under `path`, and
    /// finally `path` itself. Symlinks are removed, never followed.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if `path` does not exist or any entry
    /// cannot be removed. The tree is left partially emptied in that case.
    pub fn delete_tree(&self, path: &Utf8Path) -> Result<()> {
        let mut pending = vec![(path.to_owned(), false)];
        while let Some((dir, emptied)) = pending.pop() {
            if emptied {
                fs::remove_dir(&dir).map_err(UpdateError::io("remove", &dir))?;
                continue;
            }
            pending.push((dir.clone(), true));
            for entry in dir.read_dir_utf8().map_err(UpdateError::io("list", &dir))? {
                let entry = entry.map_err(UpdateError::io("list", &dir))?;
                let file_type = entry
                    .file_type()
                    .map_err(UpdateError::io("inspect", entry.path()))?;
                if file_type.is_dir() {
                    pending.push((entry.path().to_owned(), false));
                } else {
                    fs::remove_file(entry.path())
                        .map_err(UpdateError::io("remove", entry.path()))?;
                }
            }
        }
        Ok(())
    }

    /// Move the tree at `from` to `to`, which must not exist yet.
    ///
    /// Uses an atomic rename when the filesystem supports it and falls back
    /// to [`Self::copy_tree`] followed by [`Self::delete_tree`] otherwise. A
    /// rename refused because the paths sit on different devices also falls
    /// back. The outcome is the same either way: `to` holds the tree and
    /// `from` is gone.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::NotMoved`] if `to` already exists, the rename
    /// fails, or the copy fails. Returns [`MoveError::SourceLeft`] if the
    /// copy completed but deleting `from` failed part-way.
    pub fn rename_or_fallback(
        &self,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> std::result::Result<(), MoveError> {
        if to.exists() {
            return Err(MoveError::NotMoved(UpdateError::io("move into", to)(
                std::io::Error::from(ErrorKind::AlreadyExists),
            )));
        }
        if self.move_strategy() == MoveStrategy::Rename {
            match fs::rename(from, to) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                    log::debug!("rename {from} -> {to} crosses devices; copying instead");
                }
                Err(e) => return Err(MoveError::NotMoved(UpdateError::io("rename", from)(e))),
            }
        }
        self.copy_tree(from, to).map_err(MoveError::NotMoved)?;
        self.delete_tree(from).map_err(MoveError::SourceLeft)
    }
}

/// Check whether directories under `root` can be renamed.
///
/// Creates a scratch directory with a child, renames it, and confirms the
/// renamed directory lists its child. Any failure selects copy-then-delete.
fn probe_rename_support(root: &Utf8Path) -> MoveStrategy {
    let probe = root.join(PROBE_DIR);
    let probed = root.join(PROBED_DIR);
    let ops = TreeOps::with_strategy(MoveStrategy::CopyThenDelete);
    for leftover in [&probe, &probed] {
        if ops.exists(leftover) && ops.delete_tree(leftover).is_err() {
            log::warn!("could not clear stale rename probe {leftover}");
        }
    }

    let strategy = match ops.make_path(&probe.join(PROBE_CHILD)) {
        Err(e) => {
            log::warn!("rename probe could not create scratch directory: {e}");
            MoveStrategy::CopyThenDelete
        }
        Ok(()) => match fs::rename(&probe, &probed) {
            Ok(()) if listed_child(&probed) => MoveStrategy::Rename,
            Ok(()) => MoveStrategy::CopyThenDelete,
            Err(e) => {
                log::debug!("directory rename unsupported: {e}");
                MoveStrategy::CopyThenDelete
            }
        },
    };

    for scratch in [&probe, &probed] {
        if ops.exists(scratch) && ops.delete_tree(scratch).is_err() {
            log::warn!("could not remove rename probe {scratch}");
        }
    }
    log::debug!("directory move strategy: {strategy:?}");
    strategy
}

fn listed_child(dir: &Utf8Path) -> bool {
    dir.read_dir_utf8()
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "tree_tests.rs"]
mod tests;
