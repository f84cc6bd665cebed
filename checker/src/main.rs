//! Distribution integrity checker entrypoint.
//!
//! Loads configuration, opens the record store and runs one verification
//! pass, or repeats passes with `--forever` until Ctrl-C.

use camino::Utf8Path;
use clap::Parser;
use dist_integrity_checker::app::{Checker, StartupError, StartupOptions};
use dist_integrity_checker::cli::Cli;
use dist_integrity_checker::config::{CheckerConfig, ConfigError, DEFAULT_CONFIG_FILE};
use dist_integrity_checker::error::RunError;
use dist_integrity_checker::run::RunControl;
use log::{info, warn};
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Granularity of the shutdown check while sleeping between passes.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl From<ConfigError> for MainError {
    fn from(err: ConfigError) -> Self {
        Self::Startup(StartupError::Config(err))
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let mut stderr = std::io::stderr();
    let run_result = run(&cli);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(cli: &Cli) -> Result<CheckerConfig, ConfigError> {
    match &cli.config {
        Some(path) => CheckerConfig::load(path),
        None if Utf8Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            CheckerConfig::load(Utf8Path::new(DEFAULT_CONFIG_FILE))
        }
        None => Ok(CheckerConfig::default()),
    }
}

fn run(cli: &Cli) -> Result<(), MainError> {
    let config = load_config(cli)?;
    let checker = Checker::build(
        &config,
        &StartupOptions {
            projects: cli.projects.clone(),
            dry_run: cli.debug,
        },
    )?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(MainError::Runtime)?;
    runtime.block_on(serve(cli, &checker))
}

async fn serve(cli: &Cli, checker: &Checker) -> Result<(), MainError> {
    let control = RunControl::new();
    let signal_control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight checks");
            signal_control.request_shutdown();
        }
    });

    loop {
        let summary = checker.pass(&control).await?;
        if summary.failures() > 0 {
            warn!("{} artefact(s) failed verification", summary.failures());
        }
        if !cli.forever || control.is_shutdown_requested() {
            return Ok(());
        }
        info!("next pass in {}s", cli.interval_secs);
        if !pause(cli.interval(), &control).await {
            return Ok(());
        }
    }
}

/// Sleep for `interval`, returning `false` early if a shutdown is requested.
async fn pause(interval: Duration, control: &RunControl) -> bool {
    let deadline = tokio::time::Instant::now() + interval;
    while tokio::time::Instant::now() < deadline {
        if control.is_shutdown_requested() {
            return false;
        }
        tokio::time::sleep(SHUTDOWN_POLL.min(interval)).await;
    }
    !control.is_shutdown_requested()
}

fn exit_code_for_run_result(result: Result<(), MainError>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            match err {
                MainError::Startup(StartupError::Config(_)) => 78,
                MainError::Startup(_) | MainError::Run(_) | MainError::Runtime(_) => 1,
            }
        }
    }
}

fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort; nothing else to report to.
    }
}
