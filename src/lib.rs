#![forbid(unsafe_code)]
//! ctest: build a single C source file and check it against input/output fixtures.
//!
//! The crate is organised as a pipeline of small stages, leaf-first:
//!
//! - [`config`] resolves the effective configuration from defaults and `ctestconfig.json`
//! - [`process`] launches every external program (compiler, artifact, coverage tool)
//! - [`build`] compiles the source into an executable artifact
//! - [`fixtures`] discovers positive/negative input/output pairs
//! - [`runner`] executes the artifact per fixture and classifies the result
//! - [`coverage`] rebuilds with instrumentation and parses the coverage tool summary
//! - [`report`] aggregates verdicts into a [`report::Summary`] and renders it
//! - [`pipeline`] sequences the stages and handles interruption
//! - [`cli`] is the command-line entry point
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. Library modules enforce
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod build;
pub mod cli;
pub mod config;
pub mod coverage;
pub mod fixtures;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod runner;
pub mod version;

pub use build::{BuildResult, SourceTarget};
pub use config::{ComparisonMode, Config, ConfigError};
pub use coverage::{CoverageError, CoverageReport};
pub use fixtures::{ExpectationKind, Fixture, FixtureError, FixtureId};
pub use pipeline::{Pipeline, PipelineError};
pub use report::{CoverageOutcome, Summary};
pub use runner::{RunResult, Verdict};
