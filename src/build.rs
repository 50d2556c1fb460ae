//! Compiler invocation.
//!
//! Builds the source file under test into an executable artifact:
//!
//! ```text
//! <compiler> <compilerFlags...> -o <artifact> <source>
//! ```
//!
//! A failed build is a normal outcome ([`BuildResult::success`] is `false`), not an error: it is reported with the
//! compiler's diagnostics and the pipeline stops before running fixtures.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::Config;
use crate::process::{self, Invocation};

/// Diagnostic used when the compiler exits successfully but leaves no artifact behind.
pub const ARTIFACT_MISSING: &str = "artifact missing after successful build";

/// Diagnostic used when the artifact exists but cannot be executed.
pub const ARTIFACT_NOT_EXECUTABLE: &str = "artifact is not executable";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("C source file '{0}' does not exist")]
    Missing(PathBuf),

    #[error("'{0}' is not a file")]
    NotAFile(PathBuf),

    #[error("'{0}' has no file name")]
    NoFileName(PathBuf),

    #[error("'{0}' is not a C source file (expected a .c extension)")]
    NotCSource(PathBuf),

    #[error("cannot resolve '{path}': {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The `.c` file under test and the executable derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTarget {
    source: PathBuf,
    artifact: PathBuf,
}

impl SourceTarget {
    /// Create a target for an existing source file.
    ///
    /// The artifact lives next to the source with the same stem and the platform executable suffix
    /// (`prog.c` becomes `prog` on Unix and `prog.exe` on Windows). Relative paths are made absolute against the
    /// working directory so the artifact is never looked up on `PATH`.
    pub fn new(source: impl AsRef<Path>) -> Result<Self, SourceError> {
        let source = std::path::absolute(source.as_ref()).map_err(|e| SourceError::Resolve {
            path: source.as_ref().to_path_buf(),
            source: e,
        })?;
        if !source.exists() {
            return Err(SourceError::Missing(source));
        }
        if !source.is_file() {
            return Err(SourceError::NotAFile(source));
        }
        // The artifact shares the stem, so any other extension could name the source itself.
        if source.extension().is_none_or(|ext| ext != "c") {
            return Err(SourceError::NotCSource(source));
        }
        let artifact = artifact_path_for(&source)?;
        if artifact == source {
            return Err(SourceError::NotCSource(source));
        }
        Ok(Self { source, artifact })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// File stem of the source (`prog` for `dir/prog.c`).
    pub fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn artifact_path_for(source: &Path) -> Result<PathBuf, SourceError> {
    let stem = source
        .file_stem()
        .ok_or_else(|| SourceError::NoFileName(source.to_path_buf()))?;
    let mut name = stem.to_os_string();
    name.push(std::env::consts::EXE_SUFFIX);
    Ok(source.with_file_name(name))
}

/// Outcome of one compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub success: bool,
    /// Present only when `success` is true
    pub artifact: Option<PathBuf>,
    /// Compiler output (stdout then stderr) or the reason the build could not complete
    pub diagnostics: String,
    pub elapsed: Duration,
}

impl BuildResult {
    fn failed(diagnostics: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            artifact: None,
            diagnostics: diagnostics.into(),
            elapsed,
        }
    }
}

/// Compile `target` with the configured compiler and flags.
pub async fn build(target: &SourceTarget, config: &Config) -> BuildResult {
    compile(
        target.source(),
        target.artifact(),
        &config.compiler,
        &config.compiler_flags,
        None,
        config,
    )
    .await
}

/// Run the compiler for `source`, writing `artifact`.
///
/// Shared by the regular build and the instrumented coverage build, which passes its own flags and working
/// directory.
#[tracing::instrument(skip_all, fields(source = %source.display()))]
pub(crate) async fn compile(
    source: &Path,
    artifact: &Path,
    compiler: &str,
    flags: &[String],
    work_dir: Option<&Path>,
    config: &Config,
) -> BuildResult {
    tracing::info!(compiler, artifact = %artifact.display(), "building");

    // A stale artifact would hide a compiler that "succeeds" without writing output.
    if let Err(e) = remove_if_present(artifact) {
        return BuildResult::failed(
            format!(
                "cannot remove stale artifact '{}': {}",
                artifact.display(),
                e
            ),
            Duration::ZERO,
        );
    }

    let mut invocation = Invocation::new(compiler)
        .args(flags)
        .arg("-o")
        .arg(artifact)
        .arg(source)
        .timeout(config.tool_timeout());
    if let Some(dir) = work_dir {
        invocation = invocation.current_dir(dir);
    }

    let output = match process::execute(&invocation).await {
        Ok(output) => output,
        Err(e) => return BuildResult::failed(e.to_string(), Duration::ZERO),
    };

    if output.timed_out {
        return BuildResult::failed(
            format!(
                "compiler timed out after {}s",
                config.tool_timeout_seconds
            ),
            output.elapsed,
        );
    }

    let diagnostics = output.combined_lossy();
    if !output.success() {
        let status = match (output.exit_code, output.signal) {
            (Some(code), _) => format!("compiler exited with code {}", code),
            (None, Some(signal)) => format!("compiler terminated by signal {}", signal),
            (None, None) => "compiler terminated abnormally".to_string(),
        };
        tracing::info!(%status, "build failed");
        let text = if diagnostics.trim().is_empty() {
            status
        } else {
            format!("{}\n{}", diagnostics.trim_end(), status)
        };
        return BuildResult::failed(text, output.elapsed);
    }

    if let Err(problem) = check_artifact(artifact) {
        return BuildResult::failed(
            format!("{}: {}", problem, artifact.display()),
            output.elapsed,
        );
    }

    tracing::info!(elapsed_ms = output.elapsed.as_millis() as u64, "build succeeded");
    BuildResult {
        success: true,
        artifact: Some(artifact.to_path_buf()),
        diagnostics,
        elapsed: output.elapsed,
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn check_artifact(artifact: &Path) -> Result<(), &'static str> {
    let metadata = fs::metadata(artifact).map_err(|_| ARTIFACT_MISSING)?;
    if !metadata.is_file() {
        return Err(ARTIFACT_MISSING);
    }
    if !is_executable(&metadata) {
        return Err(ARTIFACT_NOT_EXECUTABLE);
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}

/// Path of an auxiliary artifact built from the same source, e.g. the instrumented coverage binary.
pub(crate) fn derived_artifact(dir: &Path, target: &SourceTarget, suffix: &str) -> PathBuf {
    let mut name = target.stem();
    name.push_str(suffix);
    name.push_str(std::env::consts::EXE_SUFFIX);
    dir.join(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_is_rejected() {
        let err = SourceTarget::new("/nonexistent/ctest/prog.c").unwrap_err();
        assert!(matches!(err, SourceError::Missing(_)));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_directory_is_not_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceTarget::new(dir.path()).unwrap_err();
        assert!(matches!(err, SourceError::NotAFile(_)));
    }

    #[test]
    fn test_source_without_c_extension_is_rejected_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["prog", "prog.txt", "prog.C"] {
            let source = dir.path().join(name);
            fs::write(&source, "int main(void) { return 0; }\n").unwrap();

            let err = SourceTarget::new(&source).unwrap_err();
            assert!(matches!(err, SourceError::NotCSource(_)), "{}: {:?}", name, err);
            assert!(source.exists(), "{} must not be touched", name);
        }
    }

    #[test]
    fn test_artifact_is_derived_from_stem() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sum.c");
        fs::write(&source, "int main(void) { return 0; }\n").unwrap();

        let target = SourceTarget::new(&source).unwrap();
        let expected = dir
            .path()
            .join(format!("sum{}", std::env::consts::EXE_SUFFIX));
        assert_eq!(target.artifact(), expected);
        assert_eq!(target.stem(), "sum");
        assert_eq!(
            derived_artifact(dir.path(), &target, "_cov"),
            dir.path()
                .join(format!("sum_cov{}", std::env::consts::EXE_SUFFIX))
        );
    }

    #[tokio::test]
    async fn test_unknown_compiler_fails_build() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("prog.c");
        fs::write(&source, "int main(void) { return 0; }\n").unwrap();
        let target = SourceTarget::new(&source).unwrap();
        let config = Config {
            compiler: "/nonexistent/ctest-no-such-cc".to_string(),
            ..Config::default()
        };

        let result = build(&target, &config).await;
        assert!(!result.success);
        assert!(result.artifact.is_none());
        assert!(result.diagnostics.contains("failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compiler_without_output_is_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("prog.c");
        fs::write(&source, "int main(void) { return 0; }\n").unwrap();
        let target = SourceTarget::new(&source).unwrap();
        // `true` accepts any arguments, exits 0 and writes nothing
        let config = Config {
            compiler: "true".to_string(),
            ..Config::default()
        };

        let result = build(&target, &config).await;
        assert!(!result.success);
        assert!(result.diagnostics.contains(ARTIFACT_MISSING));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compiler_failure_keeps_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("prog.c");
        fs::write(&source, "int main(void) { return 0; }\n").unwrap();
        let target = SourceTarget::new(&source).unwrap();
        // `false` ignores its arguments and exits 1
        let config = Config {
            compiler: "false".to_string(),
            ..Config::default()
        };

        let result = build(&target, &config).await;
        assert!(!result.success);
        assert!(result.diagnostics.contains("compiler exited with code 1"));
    }
}
