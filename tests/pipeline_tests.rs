//! End-to-end pipeline tests
//!
//! A C toolchain is not required: the "compiler" is a shell script that copies the source to the `-o` path, and the
//! "C source" is itself a shell script. Unix only.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use ctest::cli::ExitCode;
use ctest::fixtures::ExpectationKind;
use ctest::report::{ConsoleReporter, CoverageOutcome, Reporter, SilentReporter, render_summary};
use ctest::{BuildResult, Fixture, Pipeline, PipelineError, RunResult, Summary, Verdict};
use serde_json::json;
use tempfile::TempDir;

const FAKE_CC: &str = r#"#!/bin/sh
out=""
src=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -*) shift ;;
    *) src="$1"; shift ;;
  esac
done
if grep -q SYNTAX_ERROR "$src"; then
  echo "$src:1:1: error: expected ';' before '}' token" >&2
  exit 1
fi
cp "$src" "$out" && chmod +x "$out"
"#;

const FAKE_GCOV: &str = r#"#!/bin/sh
echo "File 'prog.c'"
echo "Lines executed:75.00% of 8"
echo "Branches executed:50.00% of 4"
"#;

/// Adds two numbers; rejects `x`, sleeps on `sleep`, crashes on `crash`.
const SUM_PROGRAM: &str = r#"#!/bin/sh
read a b
case "$a" in
  x) echo "bad input" >&2; exit 1 ;;
  sleep) exec sleep 5 ;;
  crash) kill -9 $$ ;;
esac
echo $((a + b))
"#;

// ============================================================================
// Helpers
// ============================================================================

struct Project {
    dir: TempDir,
}

impl Project {
    fn new(program: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fakecc.sh"), FAKE_CC).unwrap();
        fs::write(dir.path().join("fakegcov.sh"), FAKE_GCOV).unwrap();
        fs::write(dir.path().join("prog.c"), program).unwrap();
        fs::create_dir(dir.path().join("func_tests")).unwrap();
        let project = Self { dir };
        project.configure(json!({}));
        project
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `ctestconfig.json`: the fake compiler, no coverage, plus `extra`.
    fn configure(&self, extra: serde_json::Value) {
        let mut config = json!({
            "compiler": "sh",
            "compilerFlags": [self.root().join("fakecc.sh")],
            "coverageEnabled": false,
            "timeoutSeconds": 2,
        });
        if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }
        fs::write(
            self.root().join("ctestconfig.json"),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();
    }

    fn fixture(&self, name: &str, input: &str, expected: &str) -> &Self {
        let tests = self.root().join("func_tests");
        fs::write(tests.join(format!("{}_in.txt", name)), input).unwrap();
        fs::write(tests.join(format!("{}_out.txt", name)), expected).unwrap();
        self
    }

    async fn try_run(&self, reporter: &mut dyn Reporter) -> Result<Summary, PipelineError> {
        let pipeline = Pipeline::for_project(self.root(), None)?;
        pipeline.run(Path::new("prog.c"), reporter).await
    }

    async fn run(&self) -> Summary {
        self.try_run(&mut SilentReporter).await.unwrap()
    }
}

fn labels(summary: &Summary) -> Vec<String> {
    summary.results.iter().map(|r| r.fixture.label()).collect()
}

fn verdict_of<'a>(summary: &'a Summary, label: &str) -> &'a RunResult {
    summary
        .results
        .iter()
        .find(|r| r.fixture.label() == label)
        .unwrap_or_else(|| panic!("no result for {}", label))
}

// ============================================================================
// Verdicts
// ============================================================================

#[tokio::test]
async fn test_sum_passes_and_wrong_expectation_fails() {
    let project = Project::new(SUM_PROGRAM);
    project
        .fixture("pos_01", "3 4", "7\n")
        .fixture("pos_02", "3 4", "8\n");

    let summary = project.run().await;

    assert_eq!(verdict_of(&summary, "pos 01").verdict, Verdict::Passed);
    let failed = verdict_of(&summary, "pos 02");
    assert_eq!(failed.verdict, Verdict::Failed);
    assert_eq!(
        failed.detail.as_deref(),
        Some("output differs at line 1: expected \"8\", got \"7\"")
    );
    assert!(!summary.overall_success);
    assert_eq!(summary.positive.passed, 1);
    assert_eq!(summary.positive.failed, 1);
}

#[tokio::test]
async fn test_negative_fixture_passes_on_nonzero_exit() {
    let project = Project::new(SUM_PROGRAM);
    project.fixture("neg_01", "x", "");

    let summary = project.run().await;

    let result = verdict_of(&summary, "neg 01");
    assert_eq!(result.verdict, Verdict::Passed);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.stderr, b"bad input\n");
    assert!(summary.overall_success);
}

#[tokio::test]
async fn test_negative_fixture_fails_when_accepted() {
    let project = Project::new(SUM_PROGRAM);
    project.fixture("neg_01", "1 1", "2");

    let summary = project.run().await;

    let result = verdict_of(&summary, "neg 01");
    assert_eq!(result.verdict, Verdict::Failed);
    assert!(result.detail.as_deref().unwrap().contains("should be rejected"));
}

#[tokio::test]
async fn test_timeout_does_not_stop_later_fixtures() {
    let project = Project::new(SUM_PROGRAM);
    project.configure(json!({ "timeoutSeconds": 0.5 }));
    project
        .fixture("pos_01", "sleep", "")
        .fixture("pos_02", "20 22", "42");

    let summary = project.run().await;

    let slow = verdict_of(&summary, "pos 01");
    assert_eq!(slow.verdict, Verdict::Errored);
    assert_eq!(slow.detail.as_deref(), Some("timeout exceeded (0.5s)"));
    assert_eq!(slow.exit_code, None);
    assert_eq!(verdict_of(&summary, "pos 02").verdict, Verdict::Passed);
    assert_eq!(summary.positive.errored, 1);
}

#[tokio::test]
async fn test_crash_is_errored() {
    let project = Project::new(SUM_PROGRAM);
    project.fixture("neg_01", "crash", "");

    let summary = project.run().await;

    let result = verdict_of(&summary, "neg 01");
    assert_eq!(result.verdict, Verdict::Errored);
    assert_eq!(result.detail.as_deref(), Some("terminated by signal 9"));
}

#[tokio::test]
async fn test_shutdown_mid_run_kills_child_and_keeps_completed_results() {
    let project = Project::new(SUM_PROGRAM);
    project.configure(json!({ "timeoutSeconds": 30 }));
    project
        .fixture("pos_01", "1 2", "3")
        .fixture("pos_02", "sleep", "")
        .fixture("pos_03", "2 2", "4");

    let pipeline = Pipeline::for_project(project.root(), None).unwrap();
    let started = Instant::now();
    let summary = pipeline
        .run_until(
            Path::new("prog.c"),
            &mut SilentReporter,
            tokio::time::sleep(Duration::from_millis(1500)),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(summary.interrupted);
    assert!(!summary.overall_success);
    assert_eq!(ExitCode::for_summary(&summary), ExitCode::INTERRUPTED);
    assert_eq!(labels(&summary), ["pos 01"]);
    assert_eq!(verdict_of(&summary, "pos 01").verdict, Verdict::Passed);
    // the sleeping fixture runs for 5s unless it is killed
    assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);
}

// ============================================================================
// Build, loading and ordering
// ============================================================================

#[tokio::test]
async fn test_build_failure_runs_nothing() {
    let project = Project::new("int main(void) { SYNTAX_ERROR }\n");
    project.fixture("pos_01", "3 4", "7");

    let summary = project.run().await;

    assert!(summary.build_failed());
    assert!(summary.results.is_empty());
    assert!(!summary.overall_success);
    let build: &BuildResult = summary.build.as_ref().unwrap();
    assert!(build.diagnostics.contains("error: expected ';'"));
    assert!(build.diagnostics.contains("compiler exited with code 1"));

    let report = render_summary(&summary, false);
    assert!(report.contains("error: expected ';'"));
}

#[tokio::test]
async fn test_empty_tests_directory_succeeds() {
    let project = Project::new(SUM_PROGRAM);

    let summary = project.run().await;

    assert!(summary.overall_success);
    assert_eq!(summary.total(), 0);
    assert!(render_summary(&summary, false).contains("no tests were executed"));
}

#[tokio::test]
async fn test_missing_tests_directory_is_treated_as_empty() {
    let project = Project::new(SUM_PROGRAM);
    project.configure(json!({ "testsDirectory": "no_such_dir" }));

    let summary = project.run().await;

    assert!(summary.overall_success);
    assert_eq!(summary.total(), 0);
}

#[tokio::test]
async fn test_unpaired_input_is_a_fixture_error() {
    let project = Project::new(SUM_PROGRAM);
    fs::write(project.root().join("func_tests/pos_01_in.txt"), "3 4").unwrap();

    let err = project.try_run(&mut SilentReporter).await.unwrap_err();

    assert!(matches!(err, PipelineError::Fixture(_)));
    assert_eq!(err.exit_code(), ExitCode::FIXTURE_ERROR);
}

#[tokio::test]
async fn test_results_follow_load_order() {
    let project = Project::new(SUM_PROGRAM);
    project
        .fixture("neg_01", "x", "")
        .fixture("pos_10", "5 5", "10")
        .fixture("pos_2", "1 1", "2")
        .fixture("pos_01", "0 1", "1");

    let summary = project.run().await;

    assert_eq!(labels(&summary), ["pos 01", "pos 2", "pos 10", "neg 01"]);
    assert!(summary.overall_success);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let project = Project::new(SUM_PROGRAM);
    project
        .fixture("pos_01", "3 4", "7")
        .fixture("pos_02", "3 4", "8")
        .fixture("neg_01", "x", "");

    let first = project.run().await;
    let second = project.run().await;

    assert_eq!(first.verdicts(), second.verdicts());
    assert_eq!(first.positive, second.positive);
    assert_eq!(first.negative, second.negative);
}

#[tokio::test]
async fn test_custom_markers_and_extension() {
    let project = Project::new(SUM_PROGRAM);
    project.configure(json!({
        "positiveMarker": "ok",
        "negativeMarker": "bad",
        "fixtureExtension": "dat",
        "testsDirectory": "cases",
    }));
    let cases = project.root().join("cases");
    fs::create_dir(&cases).unwrap();
    fs::write(cases.join("ok_sum_in.dat"), "2 2").unwrap();
    fs::write(cases.join("ok_sum_out.dat"), "4").unwrap();
    fs::write(cases.join("bad_sum_in.dat"), "x").unwrap();
    fs::write(cases.join("bad_sum_out.dat"), "").unwrap();
    // not part of the convention
    fs::write(cases.join("pos_01_in.txt"), "1 1").unwrap();

    let summary = project.run().await;

    assert_eq!(labels(&summary), ["pos sum", "neg sum"]);
    assert!(summary.overall_success);
}

// ============================================================================
// Coverage
// ============================================================================

#[tokio::test]
async fn test_coverage_is_measured_with_tool_output() {
    let project = Project::new(SUM_PROGRAM);
    project.configure(json!({
        "coverageEnabled": true,
        "coverageTool": "sh",
        "coverageToolArgs": [project.root().join("fakegcov.sh")],
    }));
    project.fixture("pos_01", "3 4", "7");

    let summary = project.run().await;

    let CoverageOutcome::Measured(report) = &summary.coverage else {
        panic!("expected measured coverage, got {:?}", summary.coverage);
    };
    let entry = report.for_source(Path::new("prog.c")).unwrap();
    assert_eq!(entry.lines_percent, 75.0);
    assert_eq!(entry.lines_total, 8);
    assert!(project.root().join("prog.coverage").is_dir());
}

#[tokio::test]
async fn test_coverage_failure_is_only_a_warning() {
    let project = Project::new(SUM_PROGRAM);
    project.configure(json!({
        "coverageEnabled": true,
        "coverageTool": "/nonexistent/ctest-gcov",
    }));
    project.fixture("pos_01", "3 4", "7");

    let summary = project.run().await;

    assert!(matches!(summary.coverage, CoverageOutcome::Failed(_)));
    assert!(summary.overall_success);
    assert!(render_summary(&summary, false).contains("warning"));
}

#[tokio::test]
async fn test_unparseable_coverage_output_is_quoted_in_warning() {
    let project = Project::new(SUM_PROGRAM);
    fs::write(
        project.root().join("oddgcov.sh"),
        "#!/bin/sh\necho \"prog.gcno: unexpected version\"\n",
    )
    .unwrap();
    project.configure(json!({
        "coverageEnabled": true,
        "coverageTool": "sh",
        "coverageToolArgs": [project.root().join("oddgcov.sh")],
    }));
    project.fixture("pos_01", "3 4", "7");

    let summary = project.run().await;

    let CoverageOutcome::Failed(message) = &summary.coverage else {
        panic!("expected a coverage warning, got {:?}", summary.coverage);
    };
    assert!(message.contains("prog.gcno: unexpected version"), "{}", message);
    assert!(summary.overall_success);
    assert!(render_summary(&summary, false).contains("unexpected version"));
}

#[tokio::test]
async fn test_no_coverage_override_skips_coverage() {
    let project = Project::new(SUM_PROGRAM);
    project.configure(json!({ "coverageEnabled": true, "coverageTool": "/nonexistent/ctest-gcov" }));
    project.fixture("pos_01", "3 4", "7");

    let pipeline = Pipeline::for_project(project.root(), None)
        .unwrap()
        .without_coverage();
    let summary = pipeline
        .run(Path::new("prog.c"), &mut SilentReporter)
        .await
        .unwrap();

    assert_eq!(summary.coverage, CoverageOutcome::Skipped);
}

// ============================================================================
// Reporting
// ============================================================================

#[derive(Default)]
struct RecordingReporter {
    events: Vec<String>,
}

impl Reporter for RecordingReporter {
    fn on_build_complete(&mut self, build: &BuildResult) {
        self.events.push(format!("build {}", build.success));
    }

    fn on_fixtures_loaded(&mut self, fixtures: &[Fixture]) {
        self.events.push(format!("loaded {}", fixtures.len()));
    }

    fn on_fixture_start(&mut self, fixture: &Fixture) {
        self.events.push(format!("start {}", fixture.label()));
    }

    fn on_fixture_complete(&mut self, result: &RunResult) {
        self.events
            .push(format!("done {} {}", result.fixture.label(), result.verdict));
    }

    fn on_run_complete(&mut self, summary: &Summary) {
        self.events.push(format!("summary {}", summary.overall_success));
    }
}

#[tokio::test]
async fn test_reporter_receives_events_in_order() {
    let project = Project::new(SUM_PROGRAM);
    project
        .fixture("pos_01", "3 4", "7")
        .fixture("neg_01", "x", "");

    let mut reporter = RecordingReporter::default();
    project.try_run(&mut reporter).await.unwrap();

    assert_eq!(
        reporter.events,
        [
            "build true",
            "loaded 2",
            "start pos 01",
            "done pos 01 passed",
            "start neg 01",
            "done neg 01 passed",
            "summary true",
        ]
    );
}

#[tokio::test]
async fn test_console_reporter_prints_progress_and_report() {
    let project = Project::new(SUM_PROGRAM);
    project.fixture("pos_01", "3 4", "7");

    let mut reporter = ConsoleReporter::with_writer(Vec::new(), true, false);
    let summary = project.try_run(&mut reporter).await.unwrap();
    let output = String::from_utf8(reporter.into_inner()).unwrap();

    assert!(output.contains("Building "));
    assert!(output.contains("Testing 1 fixture(s) ..."));
    assert!(output.contains("pos 01 ... passed"));
    assert!(output.contains("PASSED: 1 passed, 0 failed, 0 errored (1 tests)"));
    assert_eq!(summary.results_of(ExpectationKind::Positive).count(), 1);
}
