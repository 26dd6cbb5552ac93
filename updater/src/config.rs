//! Updater configuration.
//!
//! [`UpdaterConfig`] is the immutable value the agent borrows for its whole
//! lifetime. [`Settings`] is the partial, layered form it is built from: a
//! TOML file, then `OTA_*` environment variables, then command-line flags,
//! each layer overriding the one before.

use crate::error::{Result, UpdateError};
use crate::repo::RepoLocator;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default registry API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
/// Default raw-content base URL.
pub const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";

/// Environment variable naming the repository (`owner/name` or a URL).
pub const ENV_REPO: &str = "OTA_REPO";
/// Environment variable naming the repository owner.
pub const ENV_REPO_OWNER: &str = "OTA_REPO_OWNER";
/// Environment variable naming the repository.
pub const ENV_REPO_NAME: &str = "OTA_REPO_NAME";
/// Environment variable holding the registry access token.
pub const ENV_ACCESS_TOKEN: &str = "OTA_ACCESS_TOKEN";
/// Environment variable holding the source sub-directory in the repository.
pub const ENV_SOURCE_DIR: &str = "OTA_SOURCE_DIR";
/// Environment variable holding the local module prefix.
pub const ENV_MODULE: &str = "OTA_MODULE";

/// Immutable configuration for one update agent.
///
/// Local trees live at `module/main_dir`, `module/staging_dir` and
/// `module/backup_dir`. Remote code lives at `source_dir/main_dir` inside
/// the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Repository holding the releases.
    pub repo: RepoLocator,
    /// Sub-directory of the repository that contains `main_dir`.
    pub source_dir: String,
    /// Local prefix under which every tree lives. Empty means the current
    /// directory.
    pub module: Utf8PathBuf,
    /// Name of the live tree.
    pub main_dir: String,
    /// Name of the staging tree.
    pub staging_dir: String,
    /// Name of the backup tree held during an install.
    pub backup_dir: String,
    /// Name of the version marker file in each tree root.
    pub version_file: String,
    /// File carried from the live tree into each staged tree, if any.
    pub secrets_file: Option<String>,
    /// Bearer token sent with every registry request.
    pub access_token: Option<String>,
    /// Extra headers sent with every registry request.
    pub headers: BTreeMap<String, String>,
    /// Registry API base URL.
    pub api_base: String,
    /// Raw-content base URL.
    pub raw_base: String,
    /// Global timeout per request. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl UpdaterConfig {
    /// Configuration for `repo` with every other field at its default.
    ///
    /// # Examples
    ///
    /// ```
    /// use ota_updater::config::UpdaterConfig;
    ///
    /// let config = UpdaterConfig::new("acme/firmware".parse().expect("valid repo"));
    /// assert_eq!(config.live_path(), "app");
    /// assert_eq!(config.staging_path(), "next");
    /// assert_eq!(config.secrets_file.as_deref(), Some("settings.toml"));
    /// ```
    #[must_use]
    pub fn new(repo: RepoLocator) -> Self {
        Self {
            repo,
            source_dir: String::new(),
            module: Utf8PathBuf::new(),
            main_dir: "app".to_owned(),
            staging_dir: "next".to_owned(),
            backup_dir: "previous".to_owned(),
            version_file: ".version".to_owned(),
            secrets_file: Some("settings.toml".to_owned()),
            access_token: None,
            headers: BTreeMap::new(),
            api_base: DEFAULT_API_BASE.to_owned(),
            raw_base: DEFAULT_RAW_BASE.to_owned(),
            timeout: None,
        }
    }

    /// Local root holding the trees.
    #[must_use]
    pub fn module_root(&self) -> &Utf8Path {
        if self.module.as_str().is_empty() {
            Utf8Path::new(".")
        } else {
            &self.module
        }
    }

    /// Path of the live tree.
    #[must_use]
    pub fn live_path(&self) -> Utf8PathBuf {
        self.module.join(&self.main_dir)
    }

    /// Path of the staging tree.
    #[must_use]
    pub fn staging_path(&self) -> Utf8PathBuf {
        self.module.join(&self.staging_dir)
    }

    /// Path of the backup tree.
    #[must_use]
    pub fn backup_path(&self) -> Utf8PathBuf {
        self.module.join(&self.backup_dir)
    }

    /// Repository path of the remote tree mirrored into staging, without
    /// leading or trailing slashes.
    #[must_use]
    pub fn remote_root(&self) -> String {
        [self.source_dir.as_str(), self.main_dir.as_str()]
            .iter()
            .map(|part| part.trim_matches('/'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn validate(&self) -> Result<()> {
        let names = [
            ("main_dir", &self.main_dir),
            ("staging_dir", &self.staging_dir),
            ("backup_dir", &self.backup_dir),
            ("version_file", &self.version_file),
        ];
        for (label, value) in names {
            if !is_plain_name(value) {
                return Err(UpdateError::InvalidConfig {
                    reason: format!("{label} {value:?} must be a single path segment"),
                });
            }
        }
        if let Some(secrets) = self.secrets_file.as_ref().filter(|s| !is_plain_name(s)) {
            return Err(UpdateError::InvalidConfig {
                reason: format!("secrets_file {secrets:?} must be a single path segment"),
            });
        }
        let distinct = self.main_dir != self.staging_dir
            && self.main_dir != self.backup_dir
            && self.staging_dir != self.backup_dir;
        if !distinct {
            return Err(UpdateError::InvalidConfig {
                reason: format!(
                    "main, staging and backup directories must differ (got {}, {}, {})",
                    self.main_dir, self.staging_dir, self.backup_dir
                ),
            });
        }
        Ok(())
    }
}

fn is_plain_name(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains(['/', '\\'])
}

/// One configuration layer. Unset fields fall through to the next layer
/// down and finally to the [`UpdaterConfig::new`] defaults.
///
/// # Examples
///
/// ```
/// use ota_updater::config::Settings;
///
/// let settings = Settings::from_toml_str(r#"
/// repo = "acme/firmware"
/// main_dir = "code"
/// "#).expect("valid settings");
/// let config = settings.into_config().expect("complete settings");
/// assert_eq!(config.live_path(), "code");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Repository as `owner/name` or a GitHub URL.
    pub repo: Option<String>,
    /// Repository owner, combined with [`Self::repo_name`].
    pub repo_owner: Option<String>,
    /// Repository name, combined with [`Self::repo_owner`].
    pub repo_name: Option<String>,
    /// See [`UpdaterConfig::source_dir`].
    pub source_dir: Option<String>,
    /// See [`UpdaterConfig::module`].
    pub module: Option<String>,
    /// See [`UpdaterConfig::main_dir`].
    pub main_dir: Option<String>,
    /// See [`UpdaterConfig::staging_dir`].
    pub staging_dir: Option<String>,
    /// See [`UpdaterConfig::backup_dir`].
    pub backup_dir: Option<String>,
    /// See [`UpdaterConfig::version_file`].
    pub version_file: Option<String>,
    /// See [`UpdaterConfig::secrets_file`]. An empty string disables the
    /// passthrough.
    pub secrets_file: Option<String>,
    /// See [`UpdaterConfig::access_token`].
    pub access_token: Option<String>,
    /// See [`UpdaterConfig::headers`]. Merged key by key across layers.
    pub headers: BTreeMap<String, String>,
    /// See [`UpdaterConfig::api_base`].
    pub api_base: Option<String>,
    /// See [`UpdaterConfig::raw_base`].
    pub raw_base: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl Settings {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidConfig`] for malformed TOML or unknown
    /// keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| UpdateError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    /// Read and parse the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if the file cannot be read and
    /// [`UpdateError::InvalidConfig`] if it cannot be parsed.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(UpdateError::io("read", path))?;
        Self::from_toml_str(&text).map_err(|e| match e {
            UpdateError::InvalidConfig { reason } => UpdateError::InvalidConfig {
                reason: format!("{path}: {reason}"),
            },
            other => other,
        })
    }

    /// Environment layer read through `lookup`.
    ///
    /// Empty values count as unset.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            repo: get(ENV_REPO),
            repo_owner: get(ENV_REPO_OWNER),
            repo_name: get(ENV_REPO_NAME),
            access_token: get(ENV_ACCESS_TOKEN),
            source_dir: get(ENV_SOURCE_DIR),
            module: get(ENV_MODULE),
            ..Self::default()
        }
    }

    /// Environment layer read from the process environment.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::from_env(|key| std::env::var(key).ok())
    }

    /// Overlay `upper` onto `self`, keeping `self` where `upper` is unset.
    #[must_use]
    pub fn overlay(mut self, upper: Self) -> Self {
        // An explicit repo in a higher layer wins over split parts below it.
        if upper.repo.is_some() {
            self.repo_owner = None;
            self.repo_name = None;
        }
        if upper.repo_owner.is_some() || upper.repo_name.is_some() {
            self.repo = None;
        }
        self.repo = upper.repo.or(self.repo);
        self.repo_owner = upper.repo_owner.or(self.repo_owner);
        self.repo_name = upper.repo_name.or(self.repo_name);
        self.source_dir = upper.source_dir.or(self.source_dir);
        self.module = upper.module.or(self.module);
        self.main_dir = upper.main_dir.or(self.main_dir);
        self.staging_dir = upper.staging_dir.or(self.staging_dir);
        self.backup_dir = upper.backup_dir.or(self.backup_dir);
        self.version_file = upper.version_file.or(self.version_file);
        self.secrets_file = upper.secrets_file.or(self.secrets_file);
        self.access_token = upper.access_token.or(self.access_token);
        self.headers.extend(upper.headers);
        self.api_base = upper.api_base.or(self.api_base);
        self.raw_base = upper.raw_base.or(self.raw_base);
        self.timeout_secs = upper.timeout_secs.or(self.timeout_secs);
        self
    }

    fn repo_locator(&self) -> Result<RepoLocator> {
        match (&self.repo, &self.repo_owner, &self.repo_name) {
            (Some(repo), _, _) => repo.parse(),
            (None, Some(owner), Some(name)) => RepoLocator::new(owner.as_str(), name.as_str()),
            (None, Some(_), None) | (None, None, Some(_)) => Err(UpdateError::InvalidConfig {
                reason: format!(
                    "repository owner and name must be set together ({ENV_REPO_OWNER}, {ENV_REPO_NAME})"
                ),
            }),
            (None, None, None) => Err(UpdateError::InvalidConfig {
                reason: format!(
                    "no repository configured; set `repo` in the config file, {ENV_REPO}, or --repo"
                ),
            }),
        }
    }

    /// Resolve this layer into a complete configuration.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidConfig`] if no repository is set or a
    /// directory name is unusable.
    pub fn into_config(self) -> Result<UpdaterConfig> {
        let mut config = UpdaterConfig::new(self.repo_locator()?);
        if let Some(source_dir) = self.source_dir {
            config.source_dir = source_dir;
        }
        if let Some(module) = self.module {
            config.module = Utf8PathBuf::from(module);
        }
        if let Some(main_dir) = self.main_dir {
            config.main_dir = main_dir;
        }
        if let Some(staging_dir) = self.staging_dir {
            config.staging_dir = staging_dir;
        }
        if let Some(backup_dir) = self.backup_dir {
            config.backup_dir = backup_dir;
        }
        if let Some(version_file) = self.version_file {
            config.version_file = version_file;
        }
        if let Some(secrets_file) = self.secrets_file {
            config.secrets_file = Some(secrets_file).filter(|name| !name.is_empty());
        }
        config.access_token = self.access_token;
        config.headers = self.headers;
        if let Some(api_base) = self.api_base {
            config.api_base = api_base;
        }
        if let Some(raw_base) = self.raw_base {
            config.raw_base = raw_base;
        }
        config.timeout = self.timeout_secs.map(Duration::from_secs);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
