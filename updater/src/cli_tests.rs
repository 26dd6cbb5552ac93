//! Tests for updater CLI parsing and default behaviours.

use super::*;
use rstest::rstest;

#[test]
fn cli_requires_a_subcommand() {
    assert!(Cli::try_parse_from(["ota-updater"]).is_err());
}

#[test]
fn cli_parses_defaults() {
    let cli = Cli::parse_from(["ota-updater", "status"]);
    assert_eq!(cli.command, Command::Status);
    assert!(cli.global.config.is_none());
    assert!(cli.global.root.is_none());
    assert!(cli.global.repo.is_none());
    assert_eq!(cli.global.verbosity, 0);
    assert!(!cli.global.quiet);
    assert_eq!(cli.global.settings(), Settings::default());
}

#[rstest]
#[case::check(&["check"], Command::Check(CheckArgs { defer: false }))]
#[case::defer(&["check", "--defer"], Command::Check(CheckArgs { defer: true }))]
#[case::install(&["install"], Command::Install)]
#[case::resume(&["resume"], Command::Resume)]
#[case::update(&["update"], Command::Update)]
fn cli_parses_subcommands(#[case] args: &[&str], #[case] expected: Command) {
    let cli = Cli::parse_from(std::iter::once("ota-updater").chain(args.iter().copied()));
    assert_eq!(cli.command, expected);
}

#[test]
fn global_options_are_accepted_after_the_subcommand() {
    let cli = Cli::parse_from([
        "ota-updater",
        "update",
        "--repo",
        "acme/fw",
        "--root",
        "/flash",
        "--main-dir",
        "code",
        "--staging-dir",
        "incoming",
    ]);
    let settings = cli.global.settings();
    assert_eq!(settings.repo.as_deref(), Some("acme/fw"));
    assert_eq!(settings.module.as_deref(), Some("/flash"));
    assert_eq!(settings.main_dir.as_deref(), Some("code"));
    assert_eq!(settings.staging_dir.as_deref(), Some("incoming"));
}

#[test]
fn cli_parses_config_file() {
    let cli = Cli::parse_from(["ota-updater", "-c", "/etc/ota.toml", "status"]);
    assert_eq!(cli.global.config, Some(Utf8PathBuf::from("/etc/ota.toml")));
}

#[rstest]
#[case::default(&[], LevelFilter::Warn)]
#[case::verbose(&["-v"], LevelFilter::Info)]
#[case::debug(&["-vv"], LevelFilter::Debug)]
#[case::trace(&["-vvvv"], LevelFilter::Trace)]
#[case::quiet(&["-q"], LevelFilter::Error)]
fn log_level_follows_flags(#[case] flags: &[&str], #[case] expected: LevelFilter) {
    let args = std::iter::once("ota-updater")
        .chain(flags.iter().copied())
        .chain(std::iter::once("status"));
    let cli = Cli::parse_from(args);
    assert_eq!(cli.global.log_level(), expected);
}

#[test]
fn verbose_conflicts_with_quiet() {
    assert!(Cli::try_parse_from(["ota-updater", "-v", "-q", "status"]).is_err());
}
