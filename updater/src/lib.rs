//! OTA self-update library.
//!
//! This crate checks a release registry for a new tagged version of a code
//! tree, downloads it into a staging tree next to the live one, and swaps it
//! in with a backup kept until the swap succeeds. It is used by the
//! `ota-updater` CLI binary and can be embedded in a device's boot sequence.
//!
//! # Modules
//!
//! - [`agent`] - The check, stage, and install state machine
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Layered configuration and tree paths
//! - [`error`] - Semantic error types
//! - [`output`] - User-facing status and progress lines
//! - [`reclaim`] - Memory reclamation hook between downloads
//! - [`release`] - Release registry access
//! - [`repo`] - Repository locator parsing
//! - [`state`] - Update cycle states
//! - [`tree`] - Recursive directory primitives and move strategy probing
//! - [`version`] - Version tags and on-disk markers

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod reclaim;
pub mod release;
pub mod repo;
pub mod state;
pub mod tree;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
