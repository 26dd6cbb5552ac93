//! Shared test utilities for the updater crate.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! behaviour tests under `tests/`.

use crate::reclaim::MemoryReclaim;
use crate::release::{Listing, ReleaseEntry, ReleaseError, ReleaseSource};
use crate::version::VersionTag;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Read};

/// Body returned by the registry when nothing is marked latest.
pub const NOT_FOUND_BODY: &str = r#"{"message":"Not Found"}"#;

#[derive(Debug, Default)]
struct StubTree {
    files: BTreeMap<String, Vec<u8>>,
    directories: BTreeSet<String>,
    broken: BTreeSet<String>,
}

/// In-memory release registry.
///
/// Releases are built file by file; directories are implied by file paths
/// and can also be added empty. Every call is counted so tests can assert
/// how much traffic an operation caused.
///
/// # Examples
///
/// ```
/// use ota_updater::release::ReleaseSource;
/// use ota_updater::test_utils::StubRelease;
///
/// let stub = StubRelease::new()
///     .with_latest("v2.0")
///     .with_file("v2.0", "app/main.py", "print('v2')");
/// assert_eq!(stub.latest_tag().expect("tag").as_str(), "v2.0");
/// assert_eq!(stub.calls(), 1);
/// ```
#[derive(Debug, Default)]
pub struct StubRelease {
    latest: Option<VersionTag>,
    trees: HashMap<VersionTag, StubTree>,
    latest_calls: Cell<usize>,
    list_calls: Cell<usize>,
    fetch_calls: Cell<usize>,
}

impl StubRelease {
    /// An empty registry with no latest release.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `tag` as the latest release.
    #[must_use]
    pub fn with_latest(mut self, tag: &str) -> Self {
        self.latest = Some(VersionTag::from(tag));
        self
    }

    /// Add a file at `path` to release `tag`.
    #[must_use]
    pub fn with_file(mut self, tag: &str, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        let tree = self.trees.entry(VersionTag::from(tag)).or_default();
        let mut parent = path;
        while let Some((dir, _)) = parent.rsplit_once('/') {
            tree.directories.insert(dir.to_owned());
            parent = dir;
        }
        tree.files.insert(path.to_owned(), contents.into());
        self
    }

    /// Add an empty directory at `path` to release `tag`.
    #[must_use]
    pub fn with_directory(mut self, tag: &str, path: &str) -> Self {
        let tree = self.trees.entry(VersionTag::from(tag)).or_default();
        let mut current = Some(path);
        while let Some(dir) = current {
            tree.directories.insert(dir.to_owned());
            current = dir.rsplit_once('/').map(|(parent, _)| parent);
        }
        self
    }

    /// Add a file whose download fails after its first bytes.
    #[must_use]
    pub fn with_broken_file(mut self, tag: &str, path: &str) -> Self {
        self = self.with_file(tag, path, b"partial");
        if let Some(tree) = self.trees.get_mut(&VersionTag::from(tag)) {
            tree.broken.insert(path.to_owned());
        }
        self
    }

    /// Number of latest-tag queries served.
    #[must_use]
    pub fn latest_calls(&self) -> usize {
        self.latest_calls.get()
    }

    /// Number of directory listings served.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.get()
    }

    /// Number of file fetches served.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.get()
    }

    /// Total number of registry calls of any kind.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.latest_calls() + self.list_calls() + self.fetch_calls()
    }

    fn tree(&self, tag: &VersionTag, url: &str) -> Result<&StubTree, ReleaseError> {
        self.trees.get(tag).ok_or_else(|| ReleaseError::NotFound {
            what: format!("release {tag}"),
            url: url.to_owned(),
            body: NOT_FOUND_BODY.to_owned(),
        })
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

impl ReleaseSource for StubRelease {
    fn latest_tag(&self) -> Result<VersionTag, ReleaseError> {
        bump(&self.latest_calls);
        self.latest.clone().ok_or_else(|| ReleaseError::NotFound {
            what: "release marked as latest (pre-releases are ignored)".to_owned(),
            url: "stub://releases/latest".to_owned(),
            body: NOT_FOUND_BODY.to_owned(),
        })
    }

    fn list_entries(&self, tag: &VersionTag, sub_path: &str) -> Result<Listing, ReleaseError> {
        bump(&self.list_calls);
        let url = format!("stub://contents/{sub_path}?ref={tag}");
        let tree = self.tree(tag, &url)?;
        let dir = sub_path.trim_matches('/');
        if !dir.is_empty() && !tree.directories.contains(dir) {
            return Err(ReleaseError::NotFound {
                what: format!("directory {dir:?} at {tag}"),
                url,
                body: NOT_FOUND_BODY.to_owned(),
            });
        }
        let directories = tree
            .directories
            .iter()
            .filter(|path| parent_of(path) == dir)
            .map(|path| ReleaseEntry::directory(path.as_str()));
        let files = tree
            .files
            .keys()
            .filter(|path| parent_of(path) == dir)
            .map(|path| ReleaseEntry::file(path.as_str()));
        Ok(Listing::new(files.chain(directories).collect()))
    }

    fn fetch_file(&self, tag: &VersionTag, path: &str) -> Result<Box<dyn Read>, ReleaseError> {
        bump(&self.fetch_calls);
        let url = format!("stub://raw/{tag}/{path}");
        let tree = self.tree(tag, &url)?;
        let contents = tree
            .files
            .get(path)
            .ok_or_else(|| ReleaseError::NotFound {
                what: format!("file {path:?} at {tag}"),
                url,
                body: "404: Not Found".to_owned(),
            })?;
        if tree.broken.contains(path) {
            return Ok(Box::new(BrokenStream {
                head: io::Cursor::new(contents.clone()),
                served: false,
            }));
        }
        Ok(Box::new(io::Cursor::new(contents.clone())))
    }
}

/// Serves its head once, then fails as if the connection dropped.
struct BrokenStream {
    head: io::Cursor<Vec<u8>>,
    served: bool,
}

impl Read for BrokenStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.served {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        self.served = true;
        self.head.read(buf)
    }
}

/// Reclaim hook that counts its invocations.
#[derive(Debug, Default)]
pub struct CountingReclaim {
    count: Cell<usize>,
}

impl CountingReclaim {
    /// Number of times the hook ran.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.get()
    }
}

impl MemoryReclaim for CountingReclaim {
    fn reclaim(&self) {
        bump(&self.count);
    }
}
