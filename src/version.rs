//! ctest version information.
//!
//! The value is taken from Cargo metadata (`CARGO_PKG_VERSION`) at compile time. The CLI `--version` flag and the
//! report header both read it from here.

/// The ctest version string (for example, `0.1.0`).
pub const CTEST_VERSION: &str = env!("CARGO_PKG_VERSION");
