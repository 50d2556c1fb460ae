//! Stage sequencing: build, load fixtures, run fixtures, measure coverage.
//!
//! The pipeline streams every event to a [`Reporter`] and returns the final [`Summary`]. Completed stages are
//! recorded as they finish, so a run interrupted by [`Pipeline::run_until`]'s shutdown future still yields the
//! partial summary. Dropping the stage future kills the in-flight child process.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::build::{self, BuildResult, SourceError, SourceTarget};
use crate::cli::ExitCode;
use crate::config::{self, Config, ConfigError, CONFIG_FILE_NAME};
use crate::coverage;
use crate::fixtures::{self, FixtureError};
use crate::report::{self, CoverageOutcome, Reporter, Summary};
use crate::runner::{self, RunResult};

/// Errors that stop the pipeline before a summary can be produced.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(
        code(ctest::config),
        help("fix or remove the offending key in the configuration file (default: ctestconfig.json)")
    )]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(ctest::source), help("pass the path of an existing C source file"))]
    Source(#[from] SourceError),

    #[error(transparent)]
    #[diagnostic(
        code(ctest::fixtures),
        help("every input file needs an expected-output file with the same kind and identifier")
    )]
    Fixture(#[from] FixtureError),

    #[error("cannot determine the working directory: {0}")]
    #[diagnostic(code(ctest::io))]
    WorkingDirectory(#[source] io::Error),
}

impl PipelineError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            PipelineError::Config(_) => ExitCode::CONFIG_ERROR,
            PipelineError::Fixture(_) => ExitCode::FIXTURE_ERROR,
            PipelineError::Source(_) | PipelineError::WorkingDirectory(_) => ExitCode::IO_ERROR,
        }
    }
}

/// What has completed so far; survives cancellation of the stage future.
#[derive(Debug, Default)]
struct Progress {
    build: Option<BuildResult>,
    results: Vec<RunResult>,
}

/// A configured test run rooted at a project directory.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
    project_root: PathBuf,
}

impl Pipeline {
    pub fn new(config: Config, project_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_root: project_root.into(),
        }
    }

    /// Resolve configuration for `project_root`.
    ///
    /// `config_path` defaults to `ctestconfig.json` in the project root; relative paths are taken from there too.
    pub fn for_project(project_root: impl Into<PathBuf>, config_path: Option<&Path>) -> Result<Self, PipelineError> {
        let project_root = project_root.into();
        let path = match config_path {
            Some(path) => project_root.join(path),
            None => project_root.join(CONFIG_FILE_NAME),
        };
        let config = config::resolve(&Config::default(), &path)?;
        Ok(Self::new(config, project_root))
    }

    /// Use the current working directory as the project root.
    pub fn in_current_dir(config_path: Option<&Path>) -> Result<Self, PipelineError> {
        let root = std::env::current_dir().map_err(PipelineError::WorkingDirectory)?;
        Self::for_project(root, config_path)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn without_coverage(mut self) -> Self {
        self.config.coverage_enabled = false;
        self
    }

    /// Run every stage to completion.
    pub async fn run(&self, source: &Path, reporter: &mut dyn Reporter) -> Result<Summary, PipelineError> {
        self.run_until(source, reporter, std::future::pending()).await
    }

    /// Run every stage, stopping early when `shutdown` resolves.
    ///
    /// On shutdown the running child is killed and the summary holds only what had completed, with
    /// `interrupted` set.
    pub async fn run_until<F>(
        &self,
        source: &Path,
        reporter: &mut dyn Reporter,
        shutdown: F,
    ) -> Result<Summary, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let source = self.project_root.join(source);
        let target = SourceTarget::new(&source)?;
        let mut progress = Progress::default();

        let finished = {
            let stages = self.stages(&target, &mut *reporter, &mut progress);
            tokio::select! {
                biased;
                () = shutdown => None,
                outcome = stages => Some(outcome),
            }
        };

        let summary = match finished {
            Some(outcome) => {
                let (build, coverage) = outcome?;
                report::aggregate(build, progress.results, coverage)
            }
            None => {
                tracing::warn!(completed = progress.results.len(), "run interrupted");
                Summary::interrupted(progress.build, progress.results)
            }
        };

        reporter.on_run_complete(&summary);
        Ok(summary)
    }

    #[tracing::instrument(skip_all, fields(source = %target.source().display()))]
    async fn stages(
        &self,
        target: &SourceTarget,
        reporter: &mut dyn Reporter,
        progress: &mut Progress,
    ) -> Result<(BuildResult, CoverageOutcome), PipelineError> {
        reporter.on_build_start(target, &self.config.compiler);
        let built = build::build(target, &self.config).await;
        reporter.on_build_complete(&built);
        progress.build = Some(built.clone());

        let artifact = match (&built.artifact, built.success) {
            (Some(artifact), true) => artifact.clone(),
            _ => return Ok((built, CoverageOutcome::Skipped)),
        };

        let tests_dir = self.config.tests_dir_in(&self.project_root);
        let fixtures = fixtures::load_fixtures(&tests_dir, &self.config)?;
        reporter.on_fixtures_loaded(&fixtures);

        for fixture in &fixtures {
            reporter.on_fixture_start(fixture);
            let result = runner::run_fixture(&artifact, fixture, &self.config, &self.project_root).await;
            reporter.on_fixture_complete(&result);
            progress.results.push(result);
        }
        tracing::info!(fixtures = fixtures.len(), "fixtures finished");

        if !self.config.coverage_enabled {
            return Ok((built, CoverageOutcome::Skipped));
        }

        reporter.on_coverage_start(target);
        let outcome = match coverage::measure(target, &fixtures, &self.config, &self.project_root).await {
            Ok(report) => CoverageOutcome::Measured(report),
            Err(e) => {
                if let coverage::CoverageError::NoCoverageData { output, .. } = &e {
                    tracing::debug!(%output, "coverage tool output");
                }
                tracing::warn!(error = %e, "coverage measurement failed");
                CoverageOutcome::Failed(e.warning())
            }
        };
        reporter.on_coverage_complete(&outcome);

        Ok((built, outcome))
    }
}
