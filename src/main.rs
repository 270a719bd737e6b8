use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use installer_testkit::engine::EngineRunner;
use installer_testkit::runner::{run, RunConfig};

#[derive(Parser, Debug)]
#[command(
    name = "itk",
    version,
    about = "Scenario test harness for the installer engine"
)]
struct Cli {
    /// Path to the engine binary under test
    #[arg(value_name = "BINARY")]
    binary: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Only execute scenarios whose name matches this pattern (* and ?)
    #[arg(short = 'r', long = "regex", value_name = "PATTERN", default_value = "*")]
    pattern: String,

    /// Run scenarios in parallel; 0 uses all available hardware contexts
    #[arg(short, long, default_value_t = 1)]
    parallel: usize,

    /// Do not clean up scenario working directories after the run
    #[arg(long)]
    keep: bool,

    /// Directory containing scenario scripts and their assets
    #[arg(long, value_name = "DIR", default_value = "tests")]
    tests_dir: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine = match EngineRunner::new(&cli.binary) {
        Ok(engine) => engine,
        Err(error) => {
            eprintln!("error: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    let config = RunConfig {
        engine,
        tests_dir: cli.tests_dir,
        pattern: cli.pattern,
        parallel: cli.parallel,
        keep: cli.keep,
    };

    match run(&config) {
        // Exit code is the failed-scenario count, usable directly as a CI gate.
        Ok(summary) => ExitCode::from(u8::try_from(summary.failures()).unwrap_or(u8::MAX)),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
