//! Unit tests for configuration layering.

use super::*;
use rstest::rstest;
use std::collections::HashMap;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_place_trees_in_current_directory() {
    let config = UpdaterConfig::new("acme/fw".parse().expect("repo"));
    assert_eq!(config.live_path(), Utf8PathBuf::from("app"));
    assert_eq!(config.staging_path(), Utf8PathBuf::from("next"));
    assert_eq!(config.backup_path(), Utf8PathBuf::from("previous"));
    assert_eq!(config.module_root(), Utf8Path::new("."));
    assert_eq!(config.version_file, ".version");
    assert_eq!(config.remote_root(), "app");
    assert!(config.timeout.is_none());
}

#[rstest]
#[case::no_source("", "app", "app")]
#[case::nested_source("firmware/src", "app", "firmware/src/app")]
#[case::slashes("/firmware/", "app", "firmware/app")]
fn remote_root_joins_source_and_main(
    #[case] source_dir: &str,
    #[case] main_dir: &str,
    #[case] expected: &str,
) {
    let mut config = UpdaterConfig::new("acme/fw".parse().expect("repo"));
    config.source_dir = source_dir.to_owned();
    config.main_dir = main_dir.to_owned();
    assert_eq!(config.remote_root(), expected);
}

#[test]
fn module_prefixes_every_tree() {
    let settings = Settings {
        repo: Some("acme/fw".to_owned()),
        module: Some("/flash/lib".to_owned()),
        ..Settings::default()
    };
    let config = settings.into_config().expect("config");
    assert_eq!(config.live_path(), Utf8PathBuf::from("/flash/lib/app"));
    assert_eq!(config.staging_path(), Utf8PathBuf::from("/flash/lib/next"));
    assert_eq!(config.module_root(), Utf8Path::new("/flash/lib"));
}

#[test]
fn toml_fills_every_field() {
    let settings = Settings::from_toml_str(
        r#"
        repo = "https://github.com/acme/fw"
        source_dir = "src"
        module = "lib"
        main_dir = "main"
        staging_dir = "incoming"
        backup_dir = "old"
        version_file = "VERSION"
        secrets_file = ""
        access_token = "t0k"
        api_base = "http://mirror/api"
        raw_base = "http://mirror/raw"
        timeout_secs = 30

        [headers]
        X-Device = "unit-7"
        "#,
    )
    .expect("parse");
    let config = settings.into_config().expect("config");

    assert_eq!(config.repo.to_string(), "acme/fw");
    assert_eq!(config.remote_root(), "src/main");
    assert_eq!(config.staging_path(), Utf8PathBuf::from("lib/incoming"));
    assert_eq!(config.backup_path(), Utf8PathBuf::from("lib/old"));
    assert_eq!(config.version_file, "VERSION");
    assert!(config.secrets_file.is_none());
    assert_eq!(config.access_token.as_deref(), Some("t0k"));
    assert_eq!(config.headers.get("X-Device").map(String::as_str), Some("unit-7"));
    assert_eq!(config.timeout, Some(Duration::from_secs(30)));
}

#[test]
fn unknown_keys_are_rejected() {
    let err = Settings::from_toml_str("repo = \"a/b\"\nbranch = \"main\"\n").expect_err("unknown key");
    assert!(matches!(err, UpdateError::InvalidConfig { reason } if reason.contains("branch")));
}

#[test]
fn missing_repository_is_invalid_config() {
    let err = Settings::default().into_config().expect_err("no repo");
    assert!(matches!(err, UpdateError::InvalidConfig { reason } if reason.contains(ENV_REPO)));
}

#[test]
fn owner_without_name_is_invalid_config() {
    let settings = Settings::from_env(env_of(&[(ENV_REPO_OWNER, "acme")]));
    let err = settings.into_config().expect_err("name missing");
    assert!(matches!(err, UpdateError::InvalidConfig { .. }));
}

#[rstest]
#[case::same_staging("app", "app", "previous")]
#[case::same_backup("app", "next", "app")]
#[case::nested("app/sub", "next", "previous")]
#[case::parent("..", "next", "previous")]
fn unusable_directory_names_are_rejected(
    #[case] main_dir: &str,
    #[case] staging_dir: &str,
    #[case] backup_dir: &str,
) {
    let settings = Settings {
        repo: Some("acme/fw".to_owned()),
        main_dir: Some(main_dir.to_owned()),
        staging_dir: Some(staging_dir.to_owned()),
        backup_dir: Some(backup_dir.to_owned()),
        ..Settings::default()
    };
    let err = settings.into_config().expect_err("bad names");
    assert!(matches!(err, UpdateError::InvalidConfig { .. }));
}

#[test]
fn env_layer_reads_split_repository_and_token() {
    let settings = Settings::from_env(env_of(&[
        (ENV_REPO_OWNER, "acme"),
        (ENV_REPO_NAME, "fw"),
        (ENV_ACCESS_TOKEN, "secret"),
        (ENV_SOURCE_DIR, ""),
    ]));
    assert!(settings.source_dir.is_none());
    let config = settings.into_config().expect("config");
    assert_eq!(config.repo.to_string(), "acme/fw");
    assert_eq!(config.access_token.as_deref(), Some("secret"));
}

#[test]
fn higher_layers_override_lower_ones() {
    let file = Settings::from_toml_str(
        "repo = \"acme/old\"\nmain_dir = \"code\"\n[headers]\nA = \"1\"\nB = \"1\"\n",
    )
    .expect("file");
    let env = Settings::from_env(env_of(&[(ENV_REPO, "acme/new")]));
    let cli = Settings {
        headers: BTreeMap::from([("B".to_owned(), "2".to_owned())]),
        staging_dir: Some("pending".to_owned()),
        ..Settings::default()
    };

    let config = file.overlay(env).overlay(cli).into_config().expect("config");

    assert_eq!(config.repo.to_string(), "acme/new");
    assert_eq!(config.main_dir, "code");
    assert_eq!(config.staging_dir, "pending");
    assert_eq!(config.headers.get("A").map(String::as_str), Some("1"));
    assert_eq!(config.headers.get("B").map(String::as_str), Some("2"));
}

#[test]
fn split_repository_in_upper_layer_replaces_lower_repo() {
    let file = Settings::from_toml_str("repo = \"acme/old\"\n").expect("file");
    let env = Settings::from_env(env_of(&[(ENV_REPO_OWNER, "other"), (ENV_REPO_NAME, "fw")]));
    let config = file.overlay(env).into_config().expect("config");
    assert_eq!(config.repo.to_string(), "other/fw");
}

#[test]
fn process_env_layer_uses_ota_variables() {
    temp_env::with_vars(
        [
            (ENV_REPO, Some("https://github.com/acme/fw.git")),
            (ENV_MODULE, Some("/flash")),
            (ENV_REPO_OWNER, None),
            (ENV_REPO_NAME, None),
            (ENV_ACCESS_TOKEN, None),
            (ENV_SOURCE_DIR, None),
        ],
        || {
            let config = Settings::from_process_env().into_config().expect("config");
            assert_eq!(config.repo.to_string(), "acme/fw");
            assert_eq!(config.live_path(), Utf8PathBuf::from("/flash/app"));
            assert!(config.access_token.is_none());
        },
    );
}

#[test]
fn load_reports_path_of_bad_file() {
    let temp = tempfile::tempdir().expect("temp dir");
    let path = Utf8PathBuf::try_from(temp.path().join("ota.toml")).expect("UTF-8 path");
    std::fs::write(&path, "repo = [").expect("write");
    let err = Settings::load(&path).expect_err("malformed");
    assert!(matches!(err, UpdateError::InvalidConfig { reason } if reason.contains("ota.toml")));
}

#[test]
fn load_of_missing_file_is_io_error() {
    let err = Settings::load(Utf8Path::new("/nonexistent/ota.toml")).expect_err("missing");
    assert!(matches!(err, UpdateError::Io { operation: "read", .. }));
}
