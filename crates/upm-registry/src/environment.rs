//! Side inputs read while reconciling a manifest: the clock, the README,
//! and the versions of the tools that produced the archive.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;

/// README name recorded in every version record.
pub const README_FILENAME: &str = "README.md";

/// Embedded when the source tree has no README.
pub const MISSING_README: &str = "ERROR: No README data found!";

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Source of the README text embedded into the manifest.
pub trait ReadmeSource {
    /// Read the README. Called once per manifest write; never cached.
    fn read(&self) -> String;
}

/// Reads `README.md` from a directory on every call.
#[derive(Debug, Clone)]
pub struct FileReadme {
    path: PathBuf,
}

impl FileReadme {
    /// README inside the given source directory.
    pub fn in_dir(dir: &Path) -> Self {
        FileReadme {
            path: dir.join(README_FILENAME),
        }
    }
}

impl ReadmeSource for FileReadme {
    fn read(&self) -> String {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "no README");
                MISSING_README.to_string()
            }
        }
    }
}

/// Fixed README text.
#[derive(Debug, Clone, Default)]
pub struct StaticReadme(pub String);

impl ReadmeSource for StaticReadme {
    fn read(&self) -> String {
        self.0.clone()
    }
}

/// Versions of the tools used to produce a version entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersions {
    /// Builder tool (npm).
    pub builder: String,
    /// Runtime tool (node).
    pub runtime: String,
}

/// Discovers tool versions from the environment.
pub trait ToolchainProbe {
    fn tool_versions(&self) -> Result<ToolVersions>;
}

impl ToolchainProbe for ToolVersions {
    fn tool_versions(&self) -> Result<ToolVersions> {
        Ok(self.clone())
    }
}
