//! Test support utilities for updater behavioural tests.
//!
//! This module provides the scratch device layout shared by the behaviour
//! test binaries: a temporary module root, a matching configuration, and
//! helpers to seed and inspect code trees on disk.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use camino::{Utf8Path, Utf8PathBuf};
use ota_updater::config::UpdaterConfig;
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Creates a temporary directory and returns it with its UTF-8 path.
///
/// The `TempDir` must be kept alive for as long as the path is used.
pub fn sandbox() -> (TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().expect("failed to create temp dir");
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).expect("temp dir path not UTF-8");
    (temp, root)
}

/// Configuration for a device whose trees live under `root`.
pub fn device_config(root: &Utf8Path) -> UpdaterConfig {
    let mut config = UpdaterConfig::new("acme/firmware".parse().expect("valid repo"));
    config.module = root.to_owned();
    config
}

/// Writes a code tree at `root` tagged `tag`, containing `files`.
///
/// Paths in `files` are relative to `root`; parent directories are created.
pub fn seed_tree(root: &Utf8Path, tag: &str, files: &[(&str, &str)]) {
    std::fs::create_dir_all(root).expect("failed to create tree root");
    std::fs::write(root.join(".version"), tag).expect("failed to write version marker");
    for (path, contents) in files {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent directory");
        }
        std::fs::write(&target, contents).expect("failed to write tree file");
    }
}

/// Every file under `root`, keyed by its `/`-separated relative path.
pub fn snapshot(root: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_owned()];
    while let Some(dir) = pending.pop() {
        for entry in dir.read_dir_utf8().expect("failed to read directory") {
            let entry = entry.expect("failed to read directory entry");
            let path = entry.path().to_owned();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .expect("entry outside snapshot root")
                .as_str()
                .replace('\\', "/");
            files.insert(relative, std::fs::read(&path).expect("failed to read file"));
        }
    }
    files
}
