//! OTA updater CLI entrypoint.
//!
//! This binary checks a GitHub repository for a new tagged release, stages it
//! next to the live code tree, and swaps it in. The exit status tells the
//! caller whether the device must restart.

use clap::Parser;
use log::LevelFilter;
use ota_updater::agent::UpdateAgent;
use ota_updater::cli::{Cli, Command, GlobalArgs};
use ota_updater::config::{Settings, UpdaterConfig};
use ota_updater::error::Result;
use ota_updater::output::{restart_message, status_text, write_stderr_line};
use ota_updater::release::github::GithubReleaseSource;
use std::io::Write;

/// Exit status reporting that a new tree was installed.
const EXIT_RESTART_REQUIRED: i32 = 2;

/// What a successful run left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    RestartRequired,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.log_level());
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Route `log` records through a stderr `tracing` subscriber. `RUST_LOG`
/// overrides the level chosen on the command line.
fn init_logging(level: LevelFilter) {
    let default_directive = level.as_str().to_ascii_lowercase();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<Outcome> {
    let config = load_config(&cli.global, Settings::from_process_env())?;
    let source = GithubReleaseSource::new(&config);
    let mut agent = UpdateAgent::new(&config, &source);
    run_command(&cli.command, &mut agent, &config, cli.global.quiet, stderr)
}

fn load_config(global: &GlobalArgs, env: Settings) -> Result<UpdaterConfig> {
    let file = match &global.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    file.overlay(env).overlay(global.settings()).into_config()
}

fn run_command(
    command: &Command,
    agent: &mut UpdateAgent<'_>,
    config: &UpdaterConfig,
    quiet: bool,
    stderr: &mut dyn Write,
) -> Result<Outcome> {
    let mut progress = |message: String| {
        if !quiet {
            write_stderr_line(stderr, message);
        }
    };
    let installed = match command {
        Command::Status => {
            progress(status_text(&agent.status(), config));
            false
        }
        Command::Check(args) if args.defer => {
            if agent.mark_pending_for_next_boot()? {
                progress("Update pending; it will be downloaded on the next resume.".to_owned());
            } else {
                progress(format!("Up to date at {}.", agent.current_version()));
            }
            false
        }
        Command::Check(_) => {
            if agent.check_and_stage()? {
                progress("Update staged; run `install` or `resume` to apply it.".to_owned());
            } else {
                progress(format!("Up to date at {}.", agent.current_version()));
            }
            false
        }
        Command::Install => {
            let installed = agent.install()?;
            if !installed {
                progress("Nothing staged.".to_owned());
            }
            installed
        }
        Command::Resume => {
            let installed = agent.resume_after_reboot()?;
            if !installed {
                progress("No pending update.".to_owned());
            }
            installed
        }
        Command::Update => {
            let installed = agent.update_now()?;
            if !installed {
                progress(format!("Up to date at {}.", agent.current_version()));
            }
            installed
        }
    };
    if installed {
        progress(restart_message(&agent.status()));
        return Ok(Outcome::RestartRequired);
    }
    Ok(Outcome::Done)
}

fn exit_code_for_run_result(result: Result<Outcome>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(Outcome::Done) => 0,
        Ok(Outcome::RestartRequired) => EXIT_RESTART_REQUIRED,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                write_stderr_line(stderr, format!("  caused by: {cause}"));
                source = std::error::Error::source(cause);
            }
            1
        }
    }
}
