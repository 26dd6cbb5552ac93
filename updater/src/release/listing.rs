//! Directory listing entries and registry response parsing.

use super::ReleaseError;
use crate::version::VersionTag;
use serde::Deserialize;

/// Whether a listed entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file, fetched with [`super::ReleaseSource::fetch_file`].
    File,
    /// A directory, walked with [`super::ReleaseSource::list_entries`].
    Directory,
}

/// One file or directory in a release listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEntry {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Final path segment.
    pub name: String,
    /// File or directory.
    pub kind: EntryKind,
}

impl ReleaseEntry {
    /// Build a file entry for `path`.
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self::with_kind(path.into(), EntryKind::File)
    }

    /// Build a directory entry for `path`.
    #[must_use]
    pub fn directory(path: impl Into<String>) -> Self {
        Self::with_kind(path.into(), EntryKind::Directory)
    }

    fn with_kind(path: String, kind: EntryKind) -> Self {
        let name = path.rsplit('/').next().unwrap_or_default().to_owned();
        Self { path, name, kind }
    }
}

/// The entries of one directory level, consumed once.
///
/// The whole level arrives in a single response; iterating does not issue
/// further requests.
#[derive(Debug, Default)]
pub struct Listing(std::vec::IntoIter<ReleaseEntry>);

impl Listing {
    /// Wrap already-fetched entries.
    #[must_use]
    pub fn new(entries: Vec<ReleaseEntry>) -> Self {
        Self(entries.into_iter())
    }
}

impl Iterator for Listing {
    type Item = ReleaseEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl ExactSizeIterator for Listing {}

#[derive(Deserialize)]
struct LatestRelease {
    tag_name: Option<String>,
}

#[derive(Deserialize)]
struct RawEntry {
    path: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Extract `tag_name` from a "latest release" response body.
///
/// # Errors
///
/// Returns [`ReleaseError::NotFound`] carrying the raw body when the field
/// is missing, which is how the registry reports that no release is marked
/// latest (a pre-release alone never counts).
pub fn parse_latest_tag(url: &str, body: &str) -> Result<VersionTag, ReleaseError> {
    let tag = serde_json::from_str::<LatestRelease>(body)
        .ok()
        .and_then(|release| release.tag_name);
    tag.map(VersionTag::from)
        .ok_or_else(|| ReleaseError::NotFound {
            what: "release marked as latest (pre-releases are ignored)".to_owned(),
            url: url.to_owned(),
            body: body.to_owned(),
        })
}

/// Parse a directory-contents response into a [`Listing`].
///
/// Entries other than files and directories (symlinks, submodules) are
/// skipped with a warning.
///
/// # Errors
///
/// Returns [`ReleaseError::UnexpectedResponse`] if the body is not a JSON
/// array of entries, for example when the path names a single file.
pub fn parse_listing(url: &str, body: &str) -> Result<Listing, ReleaseError> {
    let raw: Vec<RawEntry> =
        serde_json::from_str(body).map_err(|e| ReleaseError::UnexpectedResponse {
            url: url.to_owned(),
            reason: format!("expected a JSON array of directory entries: {e}"),
        })?;
    let entries = raw
        .into_iter()
        .filter_map(|entry| {
            let kind = match entry.kind.as_str() {
                "file" => EntryKind::File,
                "dir" => EntryKind::Directory,
                other => {
                    log::warn!("skipping {} of unsupported type {other}", entry.path);
                    return None;
                }
            };
            Some(ReleaseEntry {
                path: entry.path,
                name: entry.name,
                kind,
            })
        })
        .collect();
    Ok(Listing::new(entries))
}
