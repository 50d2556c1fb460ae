//! CLI module for ctest
//!
//! ```text
//! ctest [OPTIONS] <SOURCE>
//! ```
//!
//! ## Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | 0    | build succeeded and every fixture passed |
//! | 1    | one or more fixtures failed or errored |
//! | 2    | command-line usage error |
//! | 3    | build failed |
//! | 4    | configuration error |
//! | 5    | fixture-loading error |
//! | 6    | source file missing or other I/O error |
//! | 130  | interrupted by the user |
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use crate::pipeline::{Pipeline, PipelineError};
use crate::report::{ConsoleReporter, Summary};
use crate::version::CTEST_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const TEST_FAILURE: ExitCode = ExitCode(1);
    pub const USAGE: ExitCode = ExitCode(2);
    pub const BUILD_FAILURE: ExitCode = ExitCode(3);
    pub const CONFIG_ERROR: ExitCode = ExitCode(4);
    pub const FIXTURE_ERROR: ExitCode = ExitCode(5);
    pub const IO_ERROR: ExitCode = ExitCode(6);
    pub const INTERRUPTED: ExitCode = ExitCode(130);

    /// Exit code describing a finished (or interrupted) run.
    pub fn for_summary(summary: &Summary) -> Self {
        if summary.interrupted {
            ExitCode::INTERRUPTED
        } else if summary.build_failed() {
            ExitCode::BUILD_FAILURE
        } else if summary.overall_success {
            ExitCode::SUCCESS
        } else {
            ExitCode::TEST_FAILURE
        }
    }
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }
}

impl From<PipelineError> for CliError {
    fn from(err: PipelineError) -> Self {
        let exit_code = err.exit_code();
        let report = miette::Report::new(err);
        Self::new(format!("{:?}", report), exit_code)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Build a C program and check it against input/output fixtures
#[derive(Parser, Debug)]
#[command(name = "ctest")]
#[command(version = CTEST_VERSION)]
#[command(about = "Build a C program and check it against input/output fixtures", long_about = None)]
pub struct Cli {
    /// C source file under test
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Configuration override file (default: ctestconfig.json)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Skip coverage even if enabled in configuration
    #[arg(long = "no-coverage")]
    pub no_coverage: bool,

    /// Print each fixture's verdict with timing as it completes
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable ANSI colours
    #[arg(long = "no-color")]
    pub no_color: bool,
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help and version go to stdout and exit 0; usage errors exit 2
            let code = if e.use_stderr() { ExitCode::USAGE.0 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the parsed command line and return the exit code.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::new(format!("cannot start async runtime: {}", e), ExitCode::IO_ERROR))?;

    let mut pipeline = Pipeline::in_current_dir(cli.config.as_deref())?;
    if cli.no_coverage {
        pipeline = pipeline.without_coverage();
    }

    let colored = !cli.no_color && std::io::stdout().is_terminal();
    let mut reporter = ConsoleReporter::new(cli.verbose, colored);

    let summary = runtime.block_on(pipeline.run_until(&cli.source, &mut reporter, interrupted()))?;
    Ok(ExitCode::for_summary(&summary))
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
