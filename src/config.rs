//! Effective configuration for a ctest run.
//!
//! A run is configured by a fixed set of named options. Every option has a default (see [`Config::default`]); a
//! project may override any subset of them in a JSON object stored in `ctestconfig.json` next to where `ctest` is
//! invoked. The override is merged over the defaults key by key (shallow merge) and validated once, after which the
//! [`Config`] is immutable and passed by reference through the pipeline.
//!
//! ## Override file
//!
//! ```json
//! {
//!     "compiler": "clang",
//!     "compilerFlags": ["-std=c11", "-Wall"],
//!     "testsDirectory": "tests",
//!     "timeoutSeconds": 2.5,
//!     "coverageEnabled": false
//! }
//! ```
//!
//! Keys used by earlier versions of the tool (`args`, `tests_dir`, `coverage_meter`, `coverage_meter_args`,
//! `test_file_regex`) are accepted as aliases. Flag lists may be given either as an array of strings or as a single
//! whitespace-separated string. Unknown keys are ignored with a warning.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Name of the project-local override file.
pub const CONFIG_FILE_NAME: &str = "ctestconfig.json";

/// Errors produced while resolving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration file '{path}' is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration file '{path}' must contain a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("invalid value in configuration file '{path}': {source}")]
    InvalidValue {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid option `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// How captured stdout is compared against the expected output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    /// Byte-for-byte equality.
    Exact,
    /// Leading and trailing whitespace is ignored on both sides.
    #[default]
    Trim,
    /// Every run of whitespace counts as a single space; both ends are trimmed.
    Whitespace,
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComparisonMode::Exact => "exact",
            ComparisonMode::Trim => "trim",
            ComparisonMode::Whitespace => "whitespace",
        };
        f.write_str(name)
    }
}

/// A compiled `testFilePattern`.
///
/// Capture group 1 is the expectation kind, group 2 the fixture identifier and group 3 the file role (input or
/// expected output).
#[derive(Clone)]
pub struct FilePattern(Regex);

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::Invalid {
            key: "testFilePattern",
            reason: e.to_string(),
        })?;
        // captures_len() counts the implicit whole-match group
        if regex.captures_len() < 4 {
            return Err(ConfigError::Invalid {
                key: "testFilePattern",
                reason: format!(
                    "pattern '{}' needs three capture groups (kind, identifier, role)",
                    pattern
                ),
            });
        }
        Ok(Self(regex))
    }

    pub fn regex(&self) -> &Regex {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilePattern").field(&self.0.as_str()).finish()
    }
}

impl PartialEq for FilePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// The effective, validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Compiler command (looked up on `PATH`)
    pub compiler: String,
    /// Flags passed to the compiler before `-o <artifact> <source>`
    pub compiler_flags: Vec<String>,
    /// Fixture directory, relative to the project root unless absolute
    pub tests_directory: PathBuf,
    pub positive_marker: String,
    pub negative_marker: String,
    pub input_marker: String,
    pub output_marker: String,
    /// Extension of fixture files, without the dot
    pub fixture_extension: String,
    /// Replaces the marker-based naming convention when set
    pub test_file_pattern: Option<FilePattern>,
    pub comparison: ComparisonMode,
    /// Wall-clock limit for a single fixture run; `0` disables the limit
    pub timeout_seconds: f64,
    /// Wall-clock limit for the compiler and the coverage tool; `0` disables the limit
    pub tool_timeout_seconds: f64,
    pub coverage_enabled: bool,
    pub coverage_tool: String,
    pub coverage_tool_args: Vec<String>,
    /// Extra compiler flags for the instrumented coverage build
    pub coverage_flags: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compiler: "gcc".to_string(),
            compiler_flags: split_flags("-std=c99 -Wall -Werror -Wfloat-conversion -Wfloat-equal"),
            tests_directory: PathBuf::from("func_tests"),
            positive_marker: "pos".to_string(),
            negative_marker: "neg".to_string(),
            input_marker: "in".to_string(),
            output_marker: "out".to_string(),
            fixture_extension: "txt".to_string(),
            test_file_pattern: None,
            comparison: ComparisonMode::Trim,
            timeout_seconds: 10.0,
            tool_timeout_seconds: 120.0,
            coverage_enabled: true,
            coverage_tool: "gcov".to_string(),
            coverage_tool_args: vec!["-b".to_string()],
            coverage_flags: vec!["--coverage".to_string()],
        }
    }
}

impl Config {
    /// Per-fixture time limit, `None` when disabled.
    pub fn test_timeout(&self) -> Option<Duration> {
        seconds_to_limit(self.timeout_seconds)
    }

    /// Time limit for compiler and coverage tool invocations, `None` when disabled.
    pub fn tool_timeout(&self) -> Option<Duration> {
        seconds_to_limit(self.tool_timeout_seconds)
    }

    /// Resolve the tests directory against the project root.
    ///
    /// A leading `~/` is expanded using `HOME`; relative paths are joined onto `root`.
    pub fn tests_dir_in(&self, root: &Path) -> PathBuf {
        let expanded = expand_home(&self.tests_directory);
        if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        }
    }

    /// Apply a parsed override on top of this configuration.
    fn merge(&self, over: ConfigOverride) -> Result<Config, ConfigError> {
        let mut merged = self.clone();

        if let Some(v) = over.compiler {
            merged.compiler = v;
        }
        if let Some(v) = over.compiler_flags {
            merged.compiler_flags = v.into_vec();
        }
        if let Some(v) = over.tests_directory {
            merged.tests_directory = v;
        }
        if let Some(v) = over.positive_marker {
            merged.positive_marker = v;
        }
        if let Some(v) = over.negative_marker {
            merged.negative_marker = v;
        }
        if let Some(v) = over.input_marker {
            merged.input_marker = v;
        }
        if let Some(v) = over.output_marker {
            merged.output_marker = v;
        }
        if let Some(v) = over.fixture_extension {
            merged.fixture_extension = v.trim_start_matches('.').to_string();
        }
        if let Some(v) = over.test_file_pattern {
            merged.test_file_pattern = Some(FilePattern::new(&v)?);
        }
        if let Some(v) = over.comparison {
            merged.comparison = v;
        }
        if let Some(v) = over.timeout_seconds {
            merged.timeout_seconds = v;
        }
        if let Some(v) = over.tool_timeout_seconds {
            merged.tool_timeout_seconds = v;
        }
        if let Some(v) = over.coverage_enabled {
            merged.coverage_enabled = v;
        }
        if let Some(v) = over.coverage_tool {
            merged.coverage_tool = v;
        }
        if let Some(v) = over.coverage_tool_args {
            merged.coverage_tool_args = v.into_vec();
        }
        if let Some(v) = over.coverage_flags {
            merged.coverage_flags = v.into_vec();
        }

        merged.validate()?;
        Ok(merged)
    }

    /// Check the invariants every resolved configuration must hold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("timeoutSeconds", self.timeout_seconds)?;
        check_seconds("toolTimeoutSeconds", self.tool_timeout_seconds)?;

        if self.compiler.trim().is_empty() {
            return Err(invalid("compiler", "must not be empty"));
        }
        if self.coverage_tool.trim().is_empty() {
            return Err(invalid("coverageTool", "must not be empty"));
        }

        for (key, value) in [
            ("positiveMarker", &self.positive_marker),
            ("negativeMarker", &self.negative_marker),
            ("inputMarker", &self.input_marker),
            ("outputMarker", &self.output_marker),
        ] {
            if value.is_empty() {
                return Err(invalid(key, "must not be empty"));
            }
        }
        if self.positive_marker == self.negative_marker {
            return Err(invalid(
                "negativeMarker",
                "must differ from positiveMarker",
            ));
        }
        if self.input_marker == self.output_marker {
            return Err(invalid("outputMarker", "must differ from inputMarker"));
        }

        Ok(())
    }
}

/// Resolve the effective configuration: `defaults` with the override file at `override_path` merged on top.
///
/// A missing override file is not an error.
#[tracing::instrument(skip(defaults))]
pub fn resolve(defaults: &Config, override_path: &Path) -> Result<Config, ConfigError> {
    if !override_path.exists() {
        tracing::debug!("no configuration override found, using defaults");
        return Ok(defaults.clone());
    }

    let text = fs::read_to_string(override_path).map_err(|source| ConfigError::Read {
        path: override_path.to_path_buf(),
        source,
    })?;
    let merged = resolve_str(defaults, &text, override_path)?;
    tracing::info!(path = %override_path.display(), "loaded configuration override");
    Ok(merged)
}

/// Merge override JSON text over `defaults`; `origin` is only used in error messages.
pub fn resolve_str(defaults: &Config, text: &str, origin: &Path) -> Result<Config, ConfigError> {
    let value: Value = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;

    if !value.is_object() {
        return Err(ConfigError::NotAnObject {
            path: origin.to_path_buf(),
        });
    }

    let over: ConfigOverride =
        serde_json::from_value(value).map_err(|source| ConfigError::InvalidValue {
            path: origin.to_path_buf(),
            source,
        })?;

    for key in over.unknown.keys() {
        tracing::warn!(key = %key, path = %origin.display(), "ignoring unknown configuration key");
    }

    defaults.merge(over)
}

/// The subset of options present in an override file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigOverride {
    compiler: Option<String>,
    #[serde(alias = "args")]
    compiler_flags: Option<FlagList>,
    #[serde(alias = "tests_dir")]
    tests_directory: Option<PathBuf>,
    positive_marker: Option<String>,
    negative_marker: Option<String>,
    input_marker: Option<String>,
    output_marker: Option<String>,
    fixture_extension: Option<String>,
    #[serde(alias = "test_file_regex")]
    test_file_pattern: Option<String>,
    comparison: Option<ComparisonMode>,
    timeout_seconds: Option<f64>,
    tool_timeout_seconds: Option<f64>,
    coverage_enabled: Option<bool>,
    #[serde(alias = "coverage_meter")]
    coverage_tool: Option<String>,
    #[serde(alias = "coverage_meter_args")]
    coverage_tool_args: Option<FlagList>,
    coverage_flags: Option<FlagList>,

    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

/// A flag list, written either as an array or as one whitespace-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlagList {
    List(Vec<String>),
    Line(String),
}

impl FlagList {
    fn into_vec(self) -> Vec<String> {
        match self {
            FlagList::List(flags) => flags,
            FlagList::Line(line) => split_flags(&line),
        }
    }
}

fn split_flags(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn check_seconds(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(
            key,
            format!("must be a non-negative number of seconds, got {}", value),
        ));
    }
    Ok(())
}

// Values too large for a `Duration` behave like no limit.
fn seconds_to_limit(seconds: f64) -> Option<Duration> {
    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

// ============================================================================
// Tests
// ============================================================================
