//! Registry error types.

use std::path::PathBuf;

/// Errors that can occur while publishing into a storage root.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The archive builder failed to produce an artifact.
    #[error("archive build failed for '{name}': {detail}")]
    Build { name: String, detail: String },

    /// The version metadata is unusable.
    #[error("invalid version metadata: {detail}")]
    InvalidMetadata { detail: String },

    /// An existing manifest is missing required structure.
    #[error("malformed manifest at {path}: {detail}")]
    MalformedManifest { path: PathBuf, detail: String },

    /// The built archive could not be moved into the package directory.
    #[error("could not place archive for '{name}@{version}' at {path}: {source}")]
    ArtifactPlacement {
        name: String,
        version: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest could not be written after the archive was placed.
    #[error(
        "manifest write failed for '{name}@{version}' at {path}: {detail} \
         (archive is in storage without a manifest entry)"
    )]
    ManifestWrite {
        name: String,
        version: String,
        path: PathBuf,
        detail: String,
    },

    /// The first-publish bootstrap procedure failed.
    #[error("first publish of '{name}@{version}' failed: {detail}")]
    Bootstrap {
        name: String,
        version: String,
        detail: String,
    },

    /// Another publish holds the advisory lock for this package.
    #[error("package '{name}' is locked by {path} (remove it if no publish is running)")]
    Locked { name: String, path: PathBuf },

    /// A tool-version probe failed.
    #[error("could not determine {tool} version: {detail}")]
    Toolchain { tool: String, detail: String },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        RegistryError::MalformedManifest {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_metadata(detail: impl Into<String>) -> Self {
        RegistryError::InvalidMetadata {
            detail: detail.into(),
        }
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
