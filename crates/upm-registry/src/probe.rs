//! Registry status probing.

use std::path::Path;

use crate::archive::archive_filename;
use crate::error::Result;
use crate::storage::Storage;

/// Where a package version stands in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    /// The package has never been published here.
    NotExist,
    /// The package exists but this version's archive does not.
    NotPublished,
    /// This version's archive is already in storage.
    Published,
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PackageStatus::NotExist => "not-exist",
            PackageStatus::NotPublished => "not-published",
            PackageStatus::Published => "published",
        };
        f.write_str(s)
    }
}

/// Determines the status of a package version.
pub trait RegistryProber {
    fn probe(&self, name: &str, version: &str, storage: &Storage) -> Result<PackageStatus>;
}

/// Probes storage presence only: the package directory, then the archive.
///
/// Never parses the manifest and never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageProber;

impl RegistryProber for StorageProber {
    fn probe(&self, name: &str, version: &str, storage: &Storage) -> Result<PackageStatus> {
        let dir = storage.package_dir(name);
        let status = if !is_dir(&dir)? {
            PackageStatus::NotExist
        } else if is_file(&storage.artifact_path(name, &archive_filename(name, version)))? {
            PackageStatus::Published
        } else {
            PackageStatus::NotPublished
        };
        tracing::debug!(package = name, version, %status, "probed storage");
        Ok(status)
    }
}

fn is_dir(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn is_file(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
