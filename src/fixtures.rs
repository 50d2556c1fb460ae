//! Fixture discovery.
//!
//! A fixture is one test case for the program under test: bytes fed to its stdin, the output it is expected to
//! print, and whether the program is expected to accept the input (positive) or reject it (negative).
//!
//! ## File naming
//!
//! Fixtures live as pairs of files directly inside the tests directory. By default the names follow
//!
//! ```text
//! <kind>_<id>_<role>.<ext>        e.g. pos_01_in.txt / pos_01_out.txt, neg_bad_header_in.txt
//! ```
//!
//! where `kind` is the positive or negative marker (`pos` / `neg`), `role` is the input or output marker
//! (`in` / `out`) and `ext` is the fixture extension (`txt`). All four are configurable. Alternatively
//! `testFilePattern` supplies a regular expression whose capture groups 1, 2 and 3 are kind, identifier and role.
//!
//! ## Ordering
//!
//! All positive fixtures come first, then all negative ones; within a group fixtures are sorted by
//! [`FixtureId`]: numeric identifiers by value, before any non-numeric names, which sort lexicographically.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Config;

/// Errors that abort fixture loading.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("tests path '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("cannot read tests directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read fixture file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("input file '{input}' has no matching expected-output file '{expected}'")]
    MissingExpected { input: PathBuf, expected: PathBuf },

    #[error("fixture files '{first}' and '{second}' describe the same {kind} fixture {id}")]
    Duplicate {
        kind: ExpectationKind,
        id: FixtureId,
        first: PathBuf,
        second: PathBuf,
    },
}

/// Whether the program should accept or reject a fixture's input.
///
/// The derived order puts positive fixtures before negative ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExpectationKind {
    /// Exit code zero and matching output expected
    Positive,
    /// The program is expected to fail: nonzero exit or different output
    Negative,
}

impl fmt::Display for ExpectationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectationKind::Positive => f.write_str("positive"),
            ExpectationKind::Negative => f.write_str("negative"),
        }
    }
}

/// Fixture identifier taken from the file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FixtureId {
    /// All-digit identifier; `raw` keeps zero padding for display
    Numeric { value: u64, raw: String },
    Name(String),
}

impl FixtureId {
    pub fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(value) = raw.parse() {
                return FixtureId::Numeric {
                    value,
                    raw: raw.to_string(),
                };
            }
        }
        FixtureId::Name(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            FixtureId::Numeric { raw, .. } => raw,
            FixtureId::Name(name) => name,
        }
    }
}

impl Ord for FixtureId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                FixtureId::Numeric { value: a, raw: ra },
                FixtureId::Numeric { value: b, raw: rb },
            ) => a.cmp(b).then_with(|| ra.len().cmp(&rb.len())).then_with(|| ra.cmp(rb)),
            (FixtureId::Numeric { .. }, FixtureId::Name(_)) => Ordering::Less,
            (FixtureId::Name(_), FixtureId::Numeric { .. }) => Ordering::Greater,
            (FixtureId::Name(a), FixtureId::Name(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for FixtureId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One loaded test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub id: FixtureId,
    pub kind: ExpectationKind,
    /// Bytes fed to the program's stdin
    pub input: Vec<u8>,
    /// Bytes the program is expected to print
    pub expected: Vec<u8>,
    pub input_path: PathBuf,
    pub expected_path: PathBuf,
}

impl Fixture {
    /// Short label used in reports, e.g. `pos 01`.
    pub fn label(&self) -> String {
        let kind = match self.kind {
            ExpectationKind::Positive => "pos",
            ExpectationKind::Negative => "neg",
        };
        format!("{} {}", kind, self.id)
    }
}

/// Role of a single fixture file within its pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Input,
    Expected,
}

/// A file name decomposed according to the naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureName {
    pub kind: ExpectationKind,
    pub id: String,
    pub role: FileRole,
}

/// Decomposes fixture file names according to the configured convention.
#[derive(Debug, Clone, Copy)]
pub struct FileNaming<'a> {
    config: &'a Config,
}

impl<'a> FileNaming<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Classify a file name, `None` when it is not a fixture file.
    pub fn classify(&self, file_name: &str) -> Option<FixtureName> {
        match &self.config.test_file_pattern {
            Some(pattern) => self.classify_with_pattern(pattern.regex(), file_name),
            None => self.classify_by_markers(file_name),
        }
    }

    fn classify_with_pattern(&self, regex: &regex::Regex, file_name: &str) -> Option<FixtureName> {
        let caps = regex.captures(file_name)?;
        let kind = self.kind(caps.get(1)?.as_str())?;
        let id = caps.get(2)?.as_str();
        let role = self.role(caps.get(3)?.as_str())?;
        if id.is_empty() {
            return None;
        }
        Some(FixtureName {
            kind,
            id: id.to_string(),
            role,
        })
    }

    fn classify_by_markers(&self, file_name: &str) -> Option<FixtureName> {
        let ext = &self.config.fixture_extension;
        let stem = if ext.is_empty() {
            file_name
        } else {
            file_name.strip_suffix(ext.as_str())?.strip_suffix('.')?
        };

        for (marker, kind) in [
            (&self.config.positive_marker, ExpectationKind::Positive),
            (&self.config.negative_marker, ExpectationKind::Negative),
        ] {
            let Some(rest) = stem
                .strip_prefix(marker.as_str())
                .and_then(|r| r.strip_prefix('_'))
            else {
                continue;
            };
            for (role_marker, role) in [
                (&self.config.input_marker, FileRole::Input),
                (&self.config.output_marker, FileRole::Expected),
            ] {
                let id = rest
                    .strip_suffix(role_marker.as_str())
                    .and_then(|r| r.strip_suffix('_'));
                if let Some(id) = id.filter(|id| !id.is_empty()) {
                    return Some(FixtureName {
                        kind,
                        id: id.to_string(),
                        role,
                    });
                }
            }
        }
        None
    }

    fn kind(&self, marker: &str) -> Option<ExpectationKind> {
        if marker == self.config.positive_marker {
            Some(ExpectationKind::Positive)
        } else if marker == self.config.negative_marker {
            Some(ExpectationKind::Negative)
        } else {
            None
        }
    }

    fn role(&self, marker: &str) -> Option<FileRole> {
        if marker == self.config.input_marker {
            Some(FileRole::Input)
        } else if marker == self.config.output_marker {
            Some(FileRole::Expected)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct PairPaths {
    input: Option<PathBuf>,
    expected: Option<PathBuf>,
}

/// Load every fixture in `tests_dir`, positive group first, each group ordered by identifier.
///
/// A missing directory yields no fixtures (with a warning); an input without its expected-output file fails the
/// whole load.
#[tracing::instrument(skip_all, fields(dir = %tests_dir.display()))]
pub fn load_fixtures(tests_dir: &Path, config: &Config) -> Result<Vec<Fixture>, FixtureError> {
    if !tests_dir.exists() {
        tracing::warn!("tests directory does not exist, no fixtures will run");
        return Ok(Vec::new());
    }
    if !tests_dir.is_dir() {
        return Err(FixtureError::NotADirectory(tests_dir.to_path_buf()));
    }

    let read_dir_err = |source| FixtureError::ReadDir {
        path: tests_dir.to_path_buf(),
        source,
    };

    let naming = FileNaming::new(config);
    let mut pairs: BTreeMap<(ExpectationKind, FixtureId), PairPaths> = BTreeMap::new();

    for entry in fs::read_dir(tests_dir).map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(name) = naming.classify(file_name) else {
            tracing::debug!(file = file_name, "skipping file that is not a fixture");
            continue;
        };

        let key = (name.kind, FixtureId::parse(&name.id));
        let pair = pairs.entry(key.clone()).or_default();
        let slot = match name.role {
            FileRole::Input => &mut pair.input,
            FileRole::Expected => &mut pair.expected,
        };
        if let Some(first) = slot.replace(path.clone()) {
            // read_dir order is unspecified; report the pair sorted
            let (first, second) = if first <= path { (first, path) } else { (path, first) };
            return Err(FixtureError::Duplicate {
                kind: key.0,
                id: key.1,
                first,
                second,
            });
        }
    }

    let mut fixtures = Vec::with_capacity(pairs.len());
    for ((kind, id), pair) in pairs {
        match (pair.input, pair.expected) {
            (Some(input_path), Some(expected_path)) => {
                let input = read_fixture_file(&input_path)?;
                let expected = read_fixture_file(&expected_path)?;
                fixtures.push(Fixture {
                    id,
                    kind,
                    input,
                    expected,
                    input_path,
                    expected_path,
                });
            }
            (Some(input), None) => {
                let expected = expected_path_for(&input, kind, &id, config);
                return Err(FixtureError::MissingExpected { input, expected });
            }
            (None, Some(expected)) => {
                tracing::warn!(file = %expected.display(), "expected-output file has no input file, skipping");
            }
            (None, None) => {}
        }
    }

    tracing::info!(count = fixtures.len(), "loaded fixtures");
    Ok(fixtures)
}

fn read_fixture_file(path: &Path) -> Result<Vec<u8>, FixtureError> {
    fs::read(path).map_err(|source| FixtureError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Name the expected-output file an input should have had, for error messages.
fn expected_path_for(input: &Path, kind: ExpectationKind, id: &FixtureId, config: &Config) -> PathBuf {
    let marker = match kind {
        ExpectationKind::Positive => &config.positive_marker,
        ExpectationKind::Negative => &config.negative_marker,
    };
    let name = match &config.test_file_pattern {
        // With a custom pattern the best guess is swapping the role marker in the input's name.
        Some(_) => input
            .file_name()
            .map(|n| {
                n.to_string_lossy()
                    .replacen(config.input_marker.as_str(), &config.output_marker, 1)
            })
            .unwrap_or_default(),
        None if config.fixture_extension.is_empty() => {
            format!("{}_{}_{}", marker, id, config.output_marker)
        }
        None => format!(
            "{}_{}_{}.{}",
            marker, id, config.output_marker, config.fixture_extension
        ),
    };
    input.with_file_name(name)
}

// ============================================================================
// Tests
// ============================================================================
