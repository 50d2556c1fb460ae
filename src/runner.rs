//! Fixture execution and classification.
//!
//! Each fixture is run in its own subprocess: the artifact is launched without arguments, the fixture input is
//! written to its stdin and stdout is compared against the expected output. Failures are isolated per fixture: a
//! timeout, a crash or a launch failure is recorded in that fixture's [`RunResult`] and the next fixture runs
//! normally.
//!
//! ## Verdicts
//!
//! A run *accepts* its input when the program exits with code zero and its stdout matches the expected output
//! under the configured [`ComparisonMode`].
//!
//! | kind     | accepted | rejected | timeout / crash / launch failure |
//! |----------|----------|----------|----------------------------------|
//! | positive | Passed   | Failed   | Errored                          |
//! | negative | Failed   | Passed   | Errored                          |

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::config::{ComparisonMode, Config};
use crate::fixtures::{ExpectationKind, Fixture};
use crate::process::{self, Invocation, ProcessOutput};

/// Per-fixture outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Passed,
    /// The program ran but did not meet the fixture's expectation
    Failed,
    /// The program could not be run to completion (timeout, crash, launch failure)
    Errored,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => f.write_str("passed"),
            Verdict::Failed => f.write_str("failed"),
            Verdict::Errored => f.write_str("errored"),
        }
    }
}

/// Outcome of running one fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub fixture: Fixture,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Absent when the process was killed or never started
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub verdict: Verdict,
    /// Why the fixture did not pass: a diff summary or an execution error
    pub detail: Option<String>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    fn errored(fixture: &Fixture, detail: String, elapsed: Duration) -> Self {
        Self {
            fixture: fixture.clone(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            elapsed,
            verdict: Verdict::Errored,
            detail: Some(detail),
        }
    }
}

/// Run every fixture in order, one at a time.
///
/// Results come back in the same order as `fixtures`.
pub async fn run_all(artifact: &Path, fixtures: &[Fixture], config: &Config, work_dir: &Path) -> Vec<RunResult> {
    let mut results = Vec::with_capacity(fixtures.len());
    for fixture in fixtures {
        results.push(run_fixture(artifact, fixture, config, work_dir).await);
    }
    results
}

/// Run the artifact once against `fixture` and classify the outcome.
#[tracing::instrument(skip_all, fields(fixture = %fixture.label()))]
pub async fn run_fixture(artifact: &Path, fixture: &Fixture, config: &Config, work_dir: &Path) -> RunResult {
    let invocation = Invocation::new(artifact)
        .stdin(fixture.input.clone())
        .current_dir(work_dir)
        .timeout(config.test_timeout());

    let output = match process::execute(&invocation).await {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(error = %e, "fixture could not be launched");
            return RunResult::errored(fixture, e.to_string(), Duration::ZERO);
        }
    };

    let (verdict, detail) = classify(fixture, &output, config);
    tracing::debug!(%verdict, elapsed_ms = output.elapsed.as_millis() as u64, "fixture finished");

    RunResult {
        fixture: fixture.clone(),
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        elapsed: output.elapsed,
        verdict,
        detail,
    }
}

/// Decide the verdict for a finished process.
pub fn classify(fixture: &Fixture, output: &ProcessOutput, config: &Config) -> (Verdict, Option<String>) {
    if output.timed_out {
        return (
            Verdict::Errored,
            Some(format!("timeout exceeded ({}s)", config.timeout_seconds)),
        );
    }
    let code = match (output.exit_code, output.signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => {
            return (Verdict::Errored, Some(format!("terminated by signal {}", signal)));
        }
        (None, None) => return (Verdict::Errored, Some("terminated abnormally".to_string())),
    };

    let matches = outputs_match(&output.stdout, &fixture.expected, config.comparison);
    let accepted = code == 0 && matches;

    match (fixture.kind, accepted) {
        (ExpectationKind::Positive, true) | (ExpectationKind::Negative, false) => (Verdict::Passed, None),
        (ExpectationKind::Positive, false) => {
            let detail = if code != 0 {
                format!("exited with code {} (expected 0)", code)
            } else {
                diff_summary(&output.stdout, &fixture.expected, config.comparison)
            };
            (Verdict::Failed, Some(detail))
        }
        (ExpectationKind::Negative, true) => (
            Verdict::Failed,
            Some("program accepted input that should be rejected (exit code 0, output matched)".to_string()),
        ),
    }
}

/// Compare actual and expected output under `mode`.
pub fn outputs_match(actual: &[u8], expected: &[u8], mode: ComparisonMode) -> bool {
    normalize(actual, mode) == normalize(expected, mode)
}

/// Apply the comparison mode's normalisation to one side of a comparison.
pub fn normalize(bytes: &[u8], mode: ComparisonMode) -> Cow<'_, [u8]> {
    match mode {
        ComparisonMode::Exact => Cow::Borrowed(bytes),
        ComparisonMode::Trim => Cow::Borrowed(bytes.trim_ascii()),
        ComparisonMode::Whitespace => {
            let mut out = Vec::with_capacity(bytes.len());
            for word in bytes
                .split(|b| b.is_ascii_whitespace())
                .filter(|w| !w.is_empty())
            {
                if !out.is_empty() {
                    out.push(b' ');
                }
                out.extend_from_slice(word);
            }
            Cow::Owned(out)
        }
    }
}

/// Describe where actual output first departs from the expected output.
pub fn diff_summary(actual: &[u8], expected: &[u8], mode: ComparisonMode) -> String {
    let actual = String::from_utf8_lossy(&normalize(actual, mode)).into_owned();
    let expected = String::from_utf8_lossy(&normalize(expected, mode)).into_owned();
    let actual_lines: Vec<&str> = actual.split('\n').collect();
    let expected_lines: Vec<&str> = expected.split('\n').collect();

    let first_diff = actual_lines
        .iter()
        .zip(&expected_lines)
        .position(|(a, e)| a != e)
        .unwrap_or_else(|| actual_lines.len().min(expected_lines.len()));

    let show = |lines: &[&str]| match lines.get(first_diff) {
        Some(line) => format!("{:?}", line),
        None => "<end of output>".to_string(),
    };

    format!(
        "output differs at line {}: expected {}, got {}",
        first_diff + 1,
        show(&expected_lines[..]),
        show(&actual_lines[..])
    )
}
