//! Semantic wrapper for the release repository locator.
//!
//! Repositories are named `owner/name`. Operators often paste the browser
//! URL instead, so both forms are accepted.

use crate::error::{Result, UpdateError};
use std::fmt;
use std::str::FromStr;

const GITHUB_PREFIXES: [&str; 2] = ["https://github.com/", "http://github.com/"];

/// An `owner/name` pair identifying a release repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoLocator {
    owner: String,
    name: String,
}

impl RepoLocator {
    /// Create a locator from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidConfig`] if either part is empty or
    /// contains a path separator.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();
        for (label, part) in [("owner", &owner), ("name", &name)] {
            if part.is_empty() || part.contains('/') || part.chars().any(char::is_whitespace) {
                return Err(UpdateError::InvalidConfig {
                    reason: format!("repository {label} {part:?} is not a valid path segment"),
                });
            }
        }
        Ok(Self { owner, name })
    }

    /// The repository owner.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The repository name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for RepoLocator {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let path = GITHUB_PREFIXES
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
            .unwrap_or(trimmed);
        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        match path.split_once('/') {
            Some((owner, name)) => Self::new(owner, name),
            None => Err(UpdateError::InvalidConfig {
                reason: format!("repository {s:?} must look like owner/name"),
            }),
        }
    }
}

impl fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
