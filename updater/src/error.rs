//! Error types for the update agent.
//!
//! This module defines the semantic error variants surfaced by every agent
//! operation. Registry failures arrive as [`ReleaseError`] and are folded
//! into the same taxonomy so callers only match on [`UpdateError`].

use crate::release::ReleaseError;
use crate::version::VersionTag;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that can occur while checking, staging, or installing an update.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The release registry could not be reached or answered unexpectedly.
    #[error("network request to {url} failed: {reason}")]
    Network {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The registry has no matching release, or a file fetch returned 404.
    #[error("{what} not found at {url}; registry said: {body}")]
    NotFound {
        /// What was being looked up.
        what: String,
        /// The URL that returned nothing usable.
        url: String,
        /// The raw response body, kept for diagnostics.
        body: String,
    },

    /// The registry answered with a body this agent cannot interpret.
    #[error("unexpected response from {url}: {reason}")]
    UnexpectedResponse {
        /// The URL that was requested.
        url: String,
        /// Description of what was wrong with the body.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("failed to {operation} {path}")]
    Io {
        /// The operation that failed (create, write, remove, ...).
        operation: &'static str,
        /// The path the operation was applied to.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is missing a required value or contains a bad one.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },

    /// A staging tree carries a version marker but was never completed.
    #[error("staging directory {path} holds an incomplete download of {tag}")]
    StagingIncomplete {
        /// The staging directory.
        path: Utf8PathBuf,
        /// The tag recorded in the staging marker.
        tag: VersionTag,
    },

    /// Swapping the staged tree into place failed.
    #[error("install of {tag} failed; previous version restored: {rolled_back}")]
    InstallFailed {
        /// The tag that was being installed.
        tag: VersionTag,
        /// Whether the previous live tree was restored.
        rolled_back: bool,
        /// The failure that aborted the install.
        #[source]
        source: Box<UpdateError>,
    },
}

impl UpdateError {
    /// Build a closure that wraps an I/O error with its operation and path.
    ///
    /// Intended for `map_err` at filesystem call sites.
    pub fn io(
        operation: &'static str,
        path: impl Into<Utf8PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            operation,
            path,
            source,
        }
    }
}

impl From<ReleaseError> for UpdateError {
    fn from(err: ReleaseError) -> Self {
        match err {
            ReleaseError::Network { url, reason } => Self::Network { url, reason },
            ReleaseError::NotFound { what, url, body } => Self::NotFound { what, url, body },
            ReleaseError::UnexpectedResponse { url, reason } => {
                Self::UnexpectedResponse { url, reason }
            }
        }
    }
}

/// Result type alias using [`UpdateError`].
pub type Result<T> = std::result::Result<T, UpdateError>;
