//! Release registry access.
//!
//! The agent talks to the registry through the [`ReleaseSource`] trait so
//! that tests can serve releases from memory. [`github::GithubReleaseSource`]
//! is the production implementation backed by `ureq`.
//!
//! # Modules
//!
//! - [`github`] - GitHub-compatible HTTP implementation
//! - [`listing`] - Directory listing entries and response parsing

pub mod github;
pub mod listing;

use crate::version::VersionTag;
use std::io::Read;

pub use listing::{EntryKind, Listing, ReleaseEntry};

/// Read access to tagged releases in a remote registry.
///
/// Each call is a single blocking request. Listings cover one directory
/// level: callers walk deeper levels by issuing further calls.
#[cfg_attr(test, mockall::automock)]
pub trait ReleaseSource {
    /// Fetch the tag of the release currently marked as latest.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::NotFound`] if no release is marked latest and
    /// [`ReleaseError::Network`] on transport failure.
    fn latest_tag(&self) -> Result<VersionTag, ReleaseError>;

    /// List the entries of `sub_path` (relative to the repository root) at
    /// `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::Network`] on transport failure,
    /// [`ReleaseError::NotFound`] if the path does not exist at `tag`, and
    /// [`ReleaseError::UnexpectedResponse`] for an unparseable listing.
    fn list_entries(&self, tag: &VersionTag, sub_path: &str) -> Result<Listing, ReleaseError>;

    /// Open a stream over the raw content of `path` at `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::NotFound`] on 404 and
    /// [`ReleaseError::Network`] on any other failure.
    fn fetch_file(&self, tag: &VersionTag, path: &str) -> Result<Box<dyn Read>, ReleaseError>;
}

/// Errors arising from release registry requests.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// The request could not be completed.
    #[error("request to {url} failed: {reason}")]
    Network {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The registry holds nothing matching the request.
    #[error("{what} not found at {url}: {body}")]
    NotFound {
        /// What was being looked up.
        what: String,
        /// The URL that was requested.
        url: String,
        /// The raw response body.
        body: String,
    },

    /// The registry answered with a body that could not be interpreted.
    #[error("unexpected response from {url}: {reason}")]
    UnexpectedResponse {
        /// The URL that was requested.
        url: String,
        /// Description of the problem.
        reason: String,
    },
}
