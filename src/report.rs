//! Result aggregation and reporting.
//!
//! ## Reporter Trait
//!
//! The pipeline streams its progress through the [`Reporter`] trait, separating reporting from execution. The
//! default [`ConsoleReporter`] prints progress lines while the run is going and the sectioned summary at the end;
//! [`SilentReporter`] discards everything.
//!
//! ## Summary
//!
//! [`aggregate`] folds the build result, per-fixture results and coverage outcome into a [`Summary`]. The run is
//! successful iff the build succeeded and every fixture passed. Coverage never affects the verdict.

use std::fmt::Write as _;
use std::io::{self, Write};

use crate::build::{BuildResult, SourceTarget};
use crate::coverage::CoverageReport;
use crate::fixtures::{ExpectationKind, Fixture};
use crate::runner::{RunResult, Verdict};

/// What happened to the optional coverage step.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageOutcome {
    /// Disabled, or not reached because the build failed or the run was interrupted
    Skipped,
    Measured(CoverageReport),
    /// Non-fatal; carries the warning shown to the user
    Failed(String),
}

/// Verdict counts for one expectation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl KindCounts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }

    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Passed => self.passed += 1,
            Verdict::Failed => self.failed += 1,
            Verdict::Errored => self.errored += 1,
        }
    }
}

/// Terminal artifact of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// `None` only when the run was interrupted before the build finished
    pub build: Option<BuildResult>,
    /// In fixture load order: positive group first, then negative
    pub results: Vec<RunResult>,
    pub positive: KindCounts,
    pub negative: KindCounts,
    pub coverage: CoverageOutcome,
    pub overall_success: bool,
    pub interrupted: bool,
}

/// Fold a finished run into a [`Summary`].
pub fn aggregate(build: BuildResult, results: Vec<RunResult>, coverage: CoverageOutcome) -> Summary {
    Summary::new(Some(build), results, coverage, false)
}

impl Summary {
    /// Summary of a run cut short by the user, holding whatever had completed.
    pub fn interrupted(build: Option<BuildResult>, results: Vec<RunResult>) -> Self {
        Self::new(build, results, CoverageOutcome::Skipped, true)
    }

    fn new(
        build: Option<BuildResult>,
        results: Vec<RunResult>,
        coverage: CoverageOutcome,
        interrupted: bool,
    ) -> Self {
        let mut positive = KindCounts::default();
        let mut negative = KindCounts::default();
        for result in &results {
            match result.fixture.kind {
                ExpectationKind::Positive => positive.record(result.verdict),
                ExpectationKind::Negative => negative.record(result.verdict),
            }
        }

        let build_ok = build.as_ref().is_some_and(|b| b.success);
        let overall_success = !interrupted && build_ok && results.iter().all(RunResult::passed);

        Self {
            build,
            results,
            positive,
            negative,
            coverage,
            overall_success,
            interrupted,
        }
    }

    pub fn build_failed(&self) -> bool {
        self.build.as_ref().is_some_and(|b| !b.success)
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.positive.passed + self.negative.passed
    }

    pub fn failed(&self) -> usize {
        self.positive.failed + self.negative.failed
    }

    pub fn errored(&self) -> usize {
        self.positive.errored + self.negative.errored
    }

    /// The first result that did not pass, in report order.
    pub fn first_failure(&self) -> Option<&RunResult> {
        self.results_of(ExpectationKind::Positive)
            .chain(self.results_of(ExpectationKind::Negative))
            .find(|r| !r.passed())
    }

    pub fn results_of(&self, kind: ExpectationKind) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(move |r| r.fixture.kind == kind)
    }

    /// Verdict per fixture label, for comparing two runs.
    pub fn verdicts(&self) -> Vec<(String, Verdict)> {
        self.results
            .iter()
            .map(|r| (r.fixture.label(), r.verdict))
            .collect()
    }
}

// ============================================================================
// Reporter Trait
// ============================================================================

/// Receives pipeline progress events.
///
/// Implement this trait to customize output; every hook except the summary has an empty default.
pub trait Reporter {
    /// Called before the compiler is invoked
    fn on_build_start(&mut self, _target: &SourceTarget, _compiler: &str) {}

    /// Called with the outcome of the build
    fn on_build_complete(&mut self, _build: &BuildResult) {}

    /// Called once fixtures have been loaded
    fn on_fixtures_loaded(&mut self, _fixtures: &[Fixture]) {}

    /// Called when a fixture run begins
    fn on_fixture_start(&mut self, _fixture: &Fixture) {}

    /// Called when a fixture run completes
    fn on_fixture_complete(&mut self, _result: &RunResult) {}

    /// Called before the instrumented coverage build
    fn on_coverage_start(&mut self, _target: &SourceTarget) {}

    /// Called with the coverage outcome, including failures
    fn on_coverage_complete(&mut self, _outcome: &CoverageOutcome) {}

    /// Called when the run has finished (or was interrupted)
    fn on_run_complete(&mut self, summary: &Summary);
}

/// Reporter that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn on_run_complete(&mut self, _summary: &Summary) {}
}

/// Default console reporter.
pub struct ConsoleReporter<W: Write = io::Stdout> {
    pub verbose: bool,
    pub colored: bool,
    out: W,
}

impl ConsoleReporter<io::Stdout> {
    pub fn new(verbose: bool, colored: bool) -> Self {
        Self::with_writer(io::stdout(), verbose, colored)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn with_writer(out: W, verbose: bool, colored: bool) -> Self {
        Self { verbose, colored, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

// Console write failures (closed pipe, full disk) are not worth aborting a test run for.
impl<W: Write> Reporter for ConsoleReporter<W> {
    fn on_build_start(&mut self, target: &SourceTarget, compiler: &str) {
        let _ = writeln!(
            self.out,
            "Building {} using {} ...",
            target.source().display(),
            compiler
        );
    }

    fn on_build_complete(&mut self, build: &BuildResult) {
        if let Some(artifact) = &build.artifact {
            let _ = writeln!(self.out, "Built {}", artifact.display());
        }
    }

    fn on_fixtures_loaded(&mut self, fixtures: &[Fixture]) {
        let _ = writeln!(self.out, "Testing {} fixture(s) ...", fixtures.len());
    }

    fn on_fixture_start(&mut self, fixture: &Fixture) {
        if self.verbose {
            let _ = write!(self.out, "{} ... ", fixture.label());
            let _ = self.out.flush();
        }
    }

    fn on_fixture_complete(&mut self, result: &RunResult) {
        if self.verbose {
            let _ = writeln!(
                self.out,
                "{} ({}ms)",
                paint_verdict(result.verdict, self.colored),
                result.elapsed.as_millis()
            );
        }
    }

    fn on_coverage_start(&mut self, target: &SourceTarget) {
        let _ = writeln!(
            self.out,
            "Running coverage for {} ...",
            target.source().display()
        );
    }

    fn on_coverage_complete(&mut self, outcome: &CoverageOutcome) {
        if let (true, CoverageOutcome::Measured(report)) = (self.verbose, outcome) {
            let _ = writeln!(self.out, "Coverage measured for {} file(s)", report.files.len());
        }
    }

    fn on_run_complete(&mut self, summary: &Summary) {
        let _ = writeln!(self.out);
        let _ = write!(self.out, "{}", render_summary(summary, self.colored));
        let _ = self.out.flush();
    }
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const BOLD_RED: &str = "\x1b[1;31m";
const RESET: &str = "\x1b[0m";

fn paint(text: &str, color: &str, colored: bool) -> String {
    if colored {
        format!("{}{}{}", color, text, RESET)
    } else {
        text.to_string()
    }
}

fn paint_verdict(verdict: Verdict, colored: bool) -> String {
    match verdict {
        Verdict::Passed => paint("passed", GREEN, colored),
        Verdict::Failed => paint("FAILED", RED, colored),
        Verdict::Errored => paint("ERRORED", YELLOW, colored),
    }
}

/// Render the final sectioned report.
///
/// Sections: build status, positive results, negative results (when any), failure details, coverage, and the
/// overall result line.
pub fn render_summary(summary: &Summary, colored: bool) -> String {
    let mut out = String::new();

    match &summary.build {
        Some(build) if build.success => {
            let _ = writeln!(out, "Build: {}", paint("ok", GREEN, colored));
        }
        Some(build) => {
            let _ = writeln!(out, "Build: {}", paint("FAILED", RED, colored));
            for line in build.diagnostics.trim_end().lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
        None => {
            let _ = writeln!(out, "Build: {}", paint("not finished", YELLOW, colored));
        }
    }

    if summary.build.as_ref().is_some_and(|b| b.success) {
        let _ = writeln!(out);
        let _ = writeln!(out, "Positive tests:");
        render_group(&mut out, summary, ExpectationKind::Positive, colored);

        if summary.negative.total() > 0 {
            let _ = writeln!(out);
            let _ = writeln!(out, "Negative tests:");
            render_group(&mut out, summary, ExpectationKind::Negative, colored);
        }

        let failures: Vec<&RunResult> = summary
            .results_of(ExpectationKind::Positive)
            .chain(summary.results_of(ExpectationKind::Negative))
            .filter(|r| !r.passed())
            .collect();
        if !failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failures:");
            for result in failures {
                render_failure(&mut out, result);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Coverage:");
        match &summary.coverage {
            CoverageOutcome::Skipped => {
                let _ = writeln!(out, "  skipped");
            }
            CoverageOutcome::Measured(report) => {
                for file in &report.files {
                    let _ = write!(
                        out,
                        "  {}: {:.2}% of {} lines",
                        file.file, file.lines_percent, file.lines_total
                    );
                    if let Some(branches) = &file.branches {
                        let _ = write!(
                            out,
                            " (branches {:.2}% of {})",
                            branches.percent, branches.total
                        );
                    }
                    let _ = writeln!(out);
                }
            }
            CoverageOutcome::Failed(message) => {
                let _ = writeln!(out, "  {}: {}", paint("warning", YELLOW, colored), message);
            }
        }
    }

    let _ = writeln!(out);
    if summary.interrupted {
        let _ = writeln!(
            out,
            "{}: run cancelled, results are partial",
            paint("interrupted", YELLOW, colored)
        );
    }
    if summary.build.as_ref().is_some_and(|b| b.success) && summary.total() == 0 && !summary.interrupted {
        let _ = writeln!(
            out,
            "{}: no tests were executed",
            paint("warning", YELLOW, colored)
        );
    }

    let (label, color) = if summary.overall_success {
        ("PASSED", BOLD_GREEN)
    } else {
        ("FAILED", BOLD_RED)
    };
    let mut detail = if summary.build_failed() {
        "build failed".to_string()
    } else {
        format!(
            "{} passed, {} failed, {} errored ({} tests)",
            summary.passed(),
            summary.failed(),
            summary.errored(),
            summary.total()
        )
    };
    if let Some(first) = summary.first_failure() {
        let _ = write!(detail, "; first failure: {}", first.fixture.label());
    }
    let _ = writeln!(out, "{}: {}", paint(label, color, colored), detail);

    out
}

fn render_group(out: &mut String, summary: &Summary, kind: ExpectationKind, colored: bool) {
    let mut any = false;
    for result in summary.results_of(kind) {
        any = true;
        let _ = write!(
            out,
            "  {}: {}",
            result.fixture.id,
            paint_verdict(result.verdict, colored)
        );
        if let Some(detail) = &result.detail {
            let _ = write!(out, " ({})", detail);
        }
        let _ = writeln!(out);
    }
    if !any {
        let _ = writeln!(out, "  none");
    }
}

fn render_failure(out: &mut String, result: &RunResult) {
    let _ = writeln!(out);
    let _ = writeln!(out, "--- {} ({}) ---", result.fixture.label(), result.fixture.input_path.display());
    match result.exit_code {
        Some(code) => {
            let _ = writeln!(out, "Exit code: {}", code);
        }
        None => {
            let _ = writeln!(out, "Exit code: none");
        }
    }
    render_block(out, "Output:", &result.stdout);
    render_block(out, "Expected output:", &result.fixture.expected);
    render_block(out, "Error output:", &result.stderr);
}

fn render_block(out: &mut String, title: &str, bytes: &[u8]) {
    let _ = writeln!(out, "{}", title);
    let text = String::from_utf8_lossy(bytes);
    if text.trim().is_empty() {
        let _ = writeln!(out, "  <empty>");
    } else {
        for line in text.trim_end().lines() {
            let _ = writeln!(out, "  {}", line);
        }
    }
}
