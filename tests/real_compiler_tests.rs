//! Tests against a real C toolchain
//!
//! Each test returns early when the required tools are not installed.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use ctest::report::{CoverageOutcome, SilentReporter};
use ctest::{Config, Pipeline, Verdict};

const SUM_C: &str = r#"#include <stdio.h>

int main(void)
{
    int a, b;
    if (scanf("%d%d", &a, &b) != 2)
    {
        fprintf(stderr, "invalid input\n");
        return 1;
    }
    printf("%d\n", a + b);
    return 0;
}
"#;

fn available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sum.c"), SUM_C).unwrap();
    let tests = dir.path().join("func_tests");
    fs::create_dir(&tests).unwrap();
    for (name, content) in [
        ("pos_01_in.txt", "3 4\n"),
        ("pos_01_out.txt", "7\n"),
        ("pos_02_in.txt", "-5 5"),
        ("pos_02_out.txt", "0"),
        ("neg_01_in.txt", "abc"),
        ("neg_01_out.txt", ""),
    ] {
        fs::write(tests.join(name), content).unwrap();
    }
    dir
}

#[tokio::test]
async fn test_cc_builds_and_passes_fixtures() {
    if !available("cc") {
        eprintln!("skipping: cc not available");
        return;
    }
    let dir = project();
    let config = Config {
        compiler: "cc".to_string(),
        compiler_flags: vec!["-std=c99".to_string(), "-Wall".to_string()],
        coverage_enabled: false,
        ..Config::default()
    };

    let summary = Pipeline::new(config, dir.path())
        .run(Path::new("sum.c"), &mut SilentReporter)
        .await
        .unwrap();

    assert!(!summary.build_failed(), "{:?}", summary.build);
    assert!(summary.results.iter().all(|r| r.verdict == Verdict::Passed));
    assert!(summary.overall_success);
    assert_eq!(summary.total(), 3);
}

#[tokio::test]
async fn test_gcc_and_gcov_measure_coverage() {
    if !available("gcc") || !available("gcov") {
        eprintln!("skipping: gcc or gcov not available");
        return;
    }
    let dir = project();

    let summary = Pipeline::new(Config::default(), dir.path())
        .run(Path::new("sum.c"), &mut SilentReporter)
        .await
        .unwrap();

    assert!(summary.overall_success);
    let CoverageOutcome::Measured(report) = &summary.coverage else {
        panic!("expected measured coverage, got {:?}", summary.coverage);
    };
    let entry = report.for_source(Path::new("sum.c")).unwrap();
    assert!(entry.lines_total > 0);
    assert!(entry.lines_percent > 0.0);
}
