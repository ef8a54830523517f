//! File-system registry storage.
//!
//! Layout:
//! ```text
//! <storage_root>/
//!   <package-name>/
//!     package.json           Package manifest
//!     <name>-<version>.tgz   One archive per published version
//!   <package-name>.lock      Advisory lock while a publish runs
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveArtifact;
use crate::error::{RegistryError, Result};
use crate::integrity::shasum_file;
use crate::manifest::PackageManifest;

/// Manifest filename inside each package directory.
pub const MANIFEST_FILENAME: &str = "package.json";

/// A storage root on disk.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

/// A problem found while checking attachments against the archives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentIssue {
    /// The attachment's archive file is missing.
    Missing { filename: String },
    /// The archive's SHA-1 differs from the recorded one.
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
}

impl std::fmt::Display for AttachmentIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentIssue::Missing { filename } => write!(f, "{filename}: archive missing"),
            AttachmentIssue::ChecksumMismatch {
                filename,
                expected,
                actual,
            } => write!(f, "{filename}: shasum {actual}, expected {expected}"),
        }
    }
}

/// Append a trailing path separator if the root string lacks one.
pub fn normalize_storage_root(root: &str) -> String {
    if root.ends_with('/') || root.ends_with(std::path::MAIN_SEPARATOR) {
        root.to_string()
    } else {
        format!("{root}{}", std::path::MAIN_SEPARATOR)
    }
}

impl Storage {
    /// Storage rooted at the given directory.
    pub fn new(root: PathBuf) -> Self {
        Storage { root }
    }

    /// Storage rooted at a user-supplied path string.
    pub fn from_root_str(root: &str) -> Self {
        Storage::new(PathBuf::from(normalize_storage_root(root)))
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a package's manifest and archives.
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Path of a package's manifest file.
    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.package_dir(name).join(MANIFEST_FILENAME)
    }

    /// Path of an archive inside a package directory.
    pub fn artifact_path(&self, name: &str, filename: &str) -> PathBuf {
        self.package_dir(name).join(filename)
    }

    /// Read and validate a package's existing manifest.
    pub fn read_manifest(&self, name: &str) -> Result<PackageManifest> {
        let path = self.manifest_path(name);
        if !path.is_file() {
            return Err(RegistryError::malformed(
                &path,
                "package directory exists but has no manifest",
            ));
        }
        PackageManifest::load(&path)
    }

    /// Create a package directory (and the root) if missing.
    pub fn create_package_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.package_dir(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Move a built archive into the package directory.
    ///
    /// Refuses to overwrite an existing archive. Falls back to copy and
    /// delete when a rename is not possible (e.g. across file systems).
    pub fn place_artifact(
        &self,
        artifact: &ArchiveArtifact,
        name: &str,
        version: &str,
    ) -> Result<PathBuf> {
        let dest = self.artifact_path(name, &artifact.filename);
        let placement_err = |source: std::io::Error| RegistryError::ArtifactPlacement {
            name: name.to_string(),
            version: version.to_string(),
            path: dest.clone(),
            source,
        };

        if dest.exists() {
            return Err(placement_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "archive already present in storage",
            )));
        }

        if let Err(rename_err) = std::fs::rename(&artifact.path, &dest) {
            tracing::debug!(error = %rename_err, "rename failed, copying archive");
            if let Err(copy_err) = std::fs::copy(&artifact.path, &dest) {
                let _ = std::fs::remove_file(&dest);
                return Err(placement_err(copy_err));
            }
            if let Err(e) = std::fs::remove_file(&artifact.path) {
                tracing::warn!(
                    path = %artifact.path.display(),
                    error = %e,
                    "archive copied but source not removed"
                );
            }
        }

        tracing::debug!(archive = %dest.display(), "placed archive");
        Ok(dest)
    }

    /// Replace a package's manifest file atomically.
    ///
    /// Writes to a temporary file in the package directory and renames it
    /// over the manifest, so readers never see a partial document.
    pub fn write_manifest(&self, name: &str, version: &str, document: &str) -> Result<PathBuf> {
        let path = self.manifest_path(name);
        let write_err = |detail: String| RegistryError::ManifestWrite {
            name: name.to_string(),
            version: version.to_string(),
            path: path.clone(),
            detail,
        };

        let dir = self.package_dir(name);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| write_err(format!("creating temporary file: {e}")))?;
        tmp.write_all(document.as_bytes())
            .map_err(|e| write_err(format!("writing: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| write_err(format!("syncing: {e}")))?;
        tmp.persist(&path)
            .map_err(|e| write_err(format!("replacing manifest: {}", e.error)))?;

        Ok(path)
    }

    /// Recompute each attachment's SHA-1 from the archive on disk.
    pub fn verify_attachments(&self, manifest: &PackageManifest) -> Result<Vec<AttachmentIssue>> {
        let mut issues = Vec::new();
        for (filename, attachment) in &manifest.attachments {
            let path = self.artifact_path(&manifest.name, filename);
            if !path.is_file() {
                issues.push(AttachmentIssue::Missing {
                    filename: filename.clone(),
                });
                continue;
            }
            let actual = shasum_file(&path)?;
            if actual != attachment.shasum {
                issues.push(AttachmentIssue::ChecksumMismatch {
                    filename: filename.clone(),
                    expected: attachment.shasum.clone(),
                    actual,
                });
            }
        }
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::ArchiveDigests;

    fn built_artifact(dir: &Path, filename: &str, data: &[u8]) -> ArchiveArtifact {
        let path = dir.join(filename);
        std::fs::write(&path, data).unwrap();
        let digests = ArchiveDigests::compute(data);
        ArchiveArtifact {
            filename: filename.to_string(),
            path,
            shasum: digests.shasum,
            integrity: digests.integrity,
        }
    }

    #[test]
    fn normalize_appends_separator() {
        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(normalize_storage_root("pkgs"), format!("pkgs{sep}"));
        assert_eq!(normalize_storage_root("pkgs/"), "pkgs/");
    }

    #[test]
    fn layout_paths() {
        let storage = Storage::new(PathBuf::from("/srv/pkgs"));
        assert_eq!(storage.package_dir("foo"), PathBuf::from("/srv/pkgs/foo"));
        assert_eq!(
            storage.manifest_path("foo"),
            PathBuf::from("/srv/pkgs/foo/package.json")
        );
        assert_eq!(
            storage.artifact_path("@scope/pkg", "scope-pkg-1.0.0.tgz"),
            PathBuf::from("/srv/pkgs/@scope/pkg/scope-pkg-1.0.0.tgz")
        );
    }

    #[test]
    fn place_moves_archive() {
        let dir = tempfile::tempdir().unwrap();
        let build_dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.create_package_dir("foo").unwrap();

        let artifact = built_artifact(build_dir.path(), "foo-1.0.0.tgz", b"tarball");
        let placed = storage.place_artifact(&artifact, "foo", "1.0.0").unwrap();

        assert_eq!(placed, dir.path().join("foo/foo-1.0.0.tgz"));
        assert_eq!(std::fs::read(&placed).unwrap(), b"tarball");
        assert!(!artifact.path.exists());
    }

    #[test]
    fn place_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let build_dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.create_package_dir("foo").unwrap();
        std::fs::write(dir.path().join("foo/foo-1.0.0.tgz"), b"original").unwrap();

        let artifact = built_artifact(build_dir.path(), "foo-1.0.0.tgz", b"replacement");
        let err = storage.place_artifact(&artifact, "foo", "1.0.0").unwrap_err();

        assert!(matches!(err, RegistryError::ArtifactPlacement { .. }));
        assert_eq!(
            std::fs::read(dir.path().join("foo/foo-1.0.0.tgz")).unwrap(),
            b"original"
        );
    }

    #[test]
    fn place_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.create_package_dir("foo").unwrap();

        let artifact = ArchiveArtifact {
            filename: "foo-1.0.0.tgz".to_string(),
            path: dir.path().join("nowhere/foo-1.0.0.tgz"),
            shasum: String::new(),
            integrity: String::new(),
        };
        let err = storage.place_artifact(&artifact, "foo", "1.0.0").unwrap_err();
        assert!(err.to_string().contains("foo@1.0.0"));
        assert!(!dir.path().join("foo/foo-1.0.0.tgz").exists());
    }

    #[test]
    fn write_manifest_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.create_package_dir("foo").unwrap();

        storage.write_manifest("foo", "1.0.0", "{}\n").unwrap();
        let path = storage.write_manifest("foo", "1.1.0", "{ }\n").unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "{ }\n");
        let entries = std::fs::read_dir(dir.path().join("foo")).unwrap().count();
        assert_eq!(entries, 1, "no temporary files left behind");
    }

    #[test]
    fn write_manifest_without_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let err = storage.write_manifest("ghost", "1.0.0", "{}").unwrap_err();
        assert!(matches!(err, RegistryError::ManifestWrite { .. }));
    }

    #[test]
    fn read_manifest_missing_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.create_package_dir("foo").unwrap();
        let err = storage.read_manifest("foo").unwrap_err();
        assert!(matches!(err, RegistryError::MalformedManifest { .. }));
    }
}
