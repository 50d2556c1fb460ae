//! Line coverage via an external summarizer (gcov by default).
//!
//! Coverage is measured on a separate, instrumented build so the regular artifact stays untouched:
//!
//! 1. compile with `compilerFlags` + `coverageFlags` into `<source dir>/<stem>.coverage/`, running the compiler in
//!    that directory so the instrumentation notes (`.gcno`) land there
//! 2. rerun every fixture against the instrumented artifact; verdicts are ignored, only execution matters
//! 3. run `coverageTool [coverageToolArgs...] <notes files...>` in the same directory
//! 4. parse the tool's textual summary with [`parse_summary`]
//!
//! Any failure along the way is a [`CoverageError`], which the pipeline reports as a warning. It never changes the
//! overall test result.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::build::{self, SourceTarget};
use crate::config::Config;
use crate::fixtures::Fixture;
use crate::process::{self, Invocation, ProcessError};
use crate::runner;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("cannot prepare coverage directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("instrumented build failed: {0}")]
    Build(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("coverage tool '{0}' timed out")]
    Timeout(String),

    #[error("no line coverage figure found in the output of '{tool}'")]
    NoCoverageData { tool: String, output: String },
}

impl CoverageError {
    /// One-line warning for the report; includes the start of the tool's output when no figures were found.
    pub fn warning(&self) -> String {
        match self {
            CoverageError::NoCoverageData { output, .. } => {
                match output.lines().map(str::trim).find(|l| !l.is_empty()) {
                    Some(line) => format!("{} (tool output: {})", self, excerpt(line)),
                    None => format!("{} (tool printed nothing)", self),
                }
            }
            _ => self.to_string(),
        }
    }
}

const EXCERPT_CHARS: usize = 120;

fn excerpt(line: &str) -> String {
    if line.chars().count() <= EXCERPT_CHARS {
        line.to_string()
    } else {
        let mut short: String = line.chars().take(EXCERPT_CHARS).collect();
        short.push_str("...");
        short
    }
}

/// Coverage figures for one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCoverage {
    pub file: String,
    /// Percentage of executable lines that ran, `0.0` when there are none
    pub lines_percent: f64,
    /// Number of executable lines
    pub lines_total: u64,
    /// Branch figures, present when the tool was asked for them (`gcov -b`)
    pub branches: Option<BranchCoverage>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchCoverage {
    pub percent: f64,
    pub total: u64,
}

/// Parsed result of one coverage measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub files: Vec<FileCoverage>,
    /// Everything the tool printed, stdout then stderr
    pub raw_output: String,
}

impl CoverageReport {
    /// The entry for `source`, matched on file name.
    pub fn for_source(&self, source: &Path) -> Option<&FileCoverage> {
        let name = source.file_name()?.to_str()?;
        self.files
            .iter()
            .find(|f| Path::new(&f.file).file_name().and_then(|n| n.to_str()) == Some(name))
    }
}

/// Rebuild `target` with instrumentation, rerun `fixtures` and summarize line coverage.
#[tracing::instrument(skip_all, fields(source = %target.source().display()))]
pub async fn measure(
    target: &SourceTarget,
    fixtures: &[Fixture],
    config: &Config,
    project_root: &Path,
) -> Result<CoverageReport, CoverageError> {
    let work_dir = work_dir_for(target);
    prepare_work_dir(&work_dir)?;

    let artifact = build::derived_artifact(&work_dir, target, "");
    let flags: Vec<String> = config
        .compiler_flags
        .iter()
        .chain(&config.coverage_flags)
        .cloned()
        .collect();
    let built = build::compile(
        target.source(),
        &artifact,
        &config.compiler,
        &flags,
        Some(&work_dir),
        config,
    )
    .await;
    if !built.success {
        return Err(CoverageError::Build(built.diagnostics));
    }

    let results = runner::run_all(&artifact, fixtures, config, project_root).await;
    tracing::debug!(runs = results.len(), "reran fixtures with instrumentation");

    let mut notes = files_with_extension(&work_dir, "gcno").map_err(|source| CoverageError::WorkDir {
        path: work_dir.clone(),
        source,
    })?;
    if notes.is_empty() {
        notes.push(target.source().to_path_buf());
    }

    let invocation = Invocation::new(&config.coverage_tool)
        .args(&config.coverage_tool_args)
        .args(&notes)
        .current_dir(&work_dir)
        .timeout(config.tool_timeout());
    let output = process::execute(&invocation).await?;
    if output.timed_out {
        return Err(CoverageError::Timeout(config.coverage_tool.clone()));
    }

    let files = parse_summary(&output.stdout_lossy());
    let raw_output = output.combined_lossy();
    if files.is_empty() {
        return Err(CoverageError::NoCoverageData {
            tool: config.coverage_tool.clone(),
            output: raw_output,
        });
    }

    tracing::info!(files = files.len(), "coverage measured");
    Ok(CoverageReport { files, raw_output })
}

/// Directory holding the instrumented build and its data files.
pub fn work_dir_for(target: &SourceTarget) -> PathBuf {
    target
        .source()
        .with_file_name(format!("{}.coverage", target.stem()))
}

fn prepare_work_dir(dir: &Path) -> Result<(), CoverageError> {
    let err = |source| CoverageError::WorkDir {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(err)?;
    // Counters accumulate across runs unless the old data files are removed.
    for stale in files_with_extension(dir, "gcda").map_err(err)? {
        fs::remove_file(&stale).map_err(err)?;
    }
    Ok(())
}

fn files_with_extension(dir: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[allow(clippy::expect_used)]
static FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^File '(.+)'$").expect("INVARIANT: file header pattern is valid"));
#[allow(clippy::expect_used)]
static LINES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Lines executed:\s*([0-9]+(?:\.[0-9]+)?)% of ([0-9]+)").expect("INVARIANT: lines pattern is valid")
});
#[allow(clippy::expect_used)]
static BRANCHES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Branches executed:\s*([0-9]+(?:\.[0-9]+)?)% of ([0-9]+)")
        .expect("INVARIANT: branches pattern is valid")
});

/// Extract per-file coverage from a gcov-style summary.
///
/// Recognised lines (anything else is ignored, including "cannot open notes file" diagnostics):
///
/// ```text
/// File 'main.c'
/// Lines executed:85.71% of 14
/// Branches executed:100.00% of 4
/// No executable lines
/// ```
///
/// Figures that appear before any `File` header are attributed to an entry named `<unnamed>`.
pub fn parse_summary(output: &str) -> Vec<FileCoverage> {
    let mut files: Vec<FileCoverage> = Vec::new();
    let mut current: Option<String> = None;
    // whether `current` already produced an entry
    let mut recorded = false;

    for line in output.lines().map(str::trim) {
        if let Some(caps) = FILE_RE.captures(line) {
            current = Some(caps[1].to_string());
            recorded = false;
        } else if let Some(caps) = LINES_RE.captures(line) {
            let (Ok(percent), Ok(total)) = (caps[1].parse::<f64>(), caps[2].parse::<u64>()) else {
                continue;
            };
            files.push(FileCoverage {
                file: current.clone().unwrap_or_else(|| "<unnamed>".to_string()),
                lines_percent: percent,
                lines_total: total,
                branches: None,
            });
            recorded = true;
        } else if line == "No executable lines" {
            files.push(FileCoverage {
                file: current.clone().unwrap_or_else(|| "<unnamed>".to_string()),
                lines_percent: 0.0,
                lines_total: 0,
                branches: None,
            });
            recorded = true;
        } else if let Some(caps) = BRANCHES_RE.captures(line) {
            if !recorded {
                continue;
            }
            if let (Some(last), Ok(percent), Ok(total)) = (files.last_mut(), caps[1].parse::<f64>(), caps[2].parse::<u64>()) {
                last.branches = Some(BranchCoverage { percent, total });
            }
        }
    }

    files
}
