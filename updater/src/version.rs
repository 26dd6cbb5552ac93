//! Version tags and the on-disk version marker.
//!
//! Every tree root (live or staging) carries a small marker file holding the
//! raw tag bytes. Tags are opaque: two tags are either equal or different,
//! and a tree with no marker is treated as the never-released `0.0`.

use crate::error::{Result, UpdateError};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};

/// Tag reported for a tree that has never carried a version marker.
pub const UNRELEASED_TAG: &str = "0.0";

/// Suffix appended to the marker filename to form the completion sentinel.
const COMPLETE_SUFFIX: &str = ".complete";

/// An opaque release identifier such as `v1.2.0`.
///
/// Tags compare by exact, case-sensitive string equality. There is no
/// ordering: a tag change in either direction counts as an update.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionTag(String);

impl VersionTag {
    /// Create a tag from its textual form.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The tag of a tree that was never released or updated.
    #[must_use]
    pub fn unreleased() -> Self {
        Self(UNRELEASED_TAG.to_owned())
    }

    /// Get the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for VersionTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VersionTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for VersionTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reads and writes the version marker (and its completion sentinel) inside
/// a tree root.
///
/// The store never touches any other file in the directory.
#[derive(Debug, Clone)]
pub struct VersionStore {
    marker_name: String,
}

impl VersionStore {
    /// Create a store using `marker_name` as the marker filename.
    #[must_use]
    pub fn new(marker_name: impl Into<String>) -> Self {
        Self {
            marker_name: marker_name.into(),
        }
    }

    /// The marker filename.
    #[must_use]
    pub fn marker_name(&self) -> &str {
        &self.marker_name
    }

    /// Path of the marker file inside `directory`.
    #[must_use]
    pub fn marker_path(&self, directory: &Utf8Path) -> Utf8PathBuf {
        directory.join(&self.marker_name)
    }

    fn sentinel_path(&self, directory: &Utf8Path) -> Utf8PathBuf {
        directory.join(format!("{}{COMPLETE_SUFFIX}", self.marker_name))
    }

    /// Read the tag recorded under `directory`.
    ///
    /// Returns [`VersionTag::unreleased`] when the marker is absent. An
    /// unreadable marker is logged and treated the same way.
    #[must_use]
    pub fn read(&self, directory: &Utf8Path) -> VersionTag {
        let path = self.marker_path(directory);
        match fs::read_to_string(&path) {
            Ok(tag) => VersionTag::from(tag),
            Err(e) if e.kind() == ErrorKind::NotFound => VersionTag::unreleased(),
            Err(e) => {
                log::warn!("unreadable version marker {path}: {e}; assuming {UNRELEASED_TAG}");
                VersionTag::unreleased()
            }
        }
    }

    /// Record `tag` under `directory`, creating the directory if needed.
    ///
    /// The tag is written verbatim and synced to storage.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if the directory cannot be created or the
    /// marker cannot be written.
    pub fn write(&self, directory: &Utf8Path, tag: &VersionTag) -> Result<()> {
        fs::create_dir_all(directory).map_err(UpdateError::io("create", directory))?;
        let path = self.marker_path(directory);
        write_synced(&path, tag.as_str().as_bytes())
    }

    /// Whether `directory` carries a version marker.
    #[must_use]
    pub fn has_marker(&self, directory: &Utf8Path) -> bool {
        self.marker_path(directory).is_file()
    }

    /// Mark the tree under `directory` as completely populated.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if the sentinel cannot be written.
    pub fn mark_complete(&self, directory: &Utf8Path) -> Result<()> {
        write_synced(&self.sentinel_path(directory), b"")
    }

    /// Whether the tree under `directory` was marked complete.
    #[must_use]
    pub fn is_complete(&self, directory: &Utf8Path) -> bool {
        self.sentinel_path(directory).is_file()
    }

    /// Remove the completion sentinel, if present.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if an existing sentinel cannot be removed.
    pub fn clear_complete(&self, directory: &Utf8Path) -> Result<()> {
        let path = self.sentinel_path(directory);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(UpdateError::io("remove", path)(e)),
            _ => Ok(()),
        }
    }
}

fn write_synced(path: &Utf8Path, contents: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).map_err(UpdateError::io("create", path))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(UpdateError::io("write", path))
}
