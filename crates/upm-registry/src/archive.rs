//! Archive building.
//!
//! An [`ArchiveBuilder`] turns a source directory into a gzip-compressed
//! tarball plus its digests. [`TarballBuilder`] does this natively; the
//! npm-backed builder lives in [`crate::npm`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use tar::{Builder, Header, HeaderMode};
use walkdir::{DirEntry, WalkDir};

use crate::error::{RegistryError, Result};
use crate::integrity::ArchiveDigests;
use crate::metadata::VersionMetadata;

/// Extension of every archive produced for the registry.
pub const ARCHIVE_EXTENSION: &str = "tgz";

/// Directory prefix of every entry inside an archive.
const ENTRY_PREFIX: &str = "package";

/// Top-level entries never packed.
const SKIPPED_ENTRIES: &[&str] = &[".git", "node_modules", ".DS_Store"];

/// A freshly built archive, consumed by the reconciler and then placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArtifact {
    /// `<name>-<version>.tgz`.
    pub filename: String,
    /// Where the builder left the archive.
    pub path: PathBuf,
    /// SHA-1 hex digest.
    pub shasum: String,
    /// `sha512-<base64>` digest.
    pub integrity: String,
}

/// Packs a source directory into an archive.
pub trait ArchiveBuilder {
    /// Build the archive for the package in `source_dir`.
    fn build(&self, source_dir: &Path) -> Result<ArchiveArtifact>;
}

/// Archive filename for a package version.
///
/// Scoped names lose the `@` and have `/` replaced, so `@scope/pkg` at
/// `1.0.0` packs to `scope-pkg-1.0.0.tgz`.
pub fn archive_filename(name: &str, version: &str) -> String {
    let flat = name.trim_start_matches('@').replace('/', "-");
    format!("{flat}-{version}.{ARCHIVE_EXTENSION}")
}

/// Native gzip-tar builder.
///
/// Entries are sorted and carry zeroed timestamps and ownership, so the same
/// tree always produces the same bytes.
#[derive(Debug, Clone, Default)]
pub struct TarballBuilder {
    out_dir: Option<PathBuf>,
}

impl TarballBuilder {
    /// Write archives into the source directory.
    pub fn new() -> Self {
        TarballBuilder::default()
    }

    /// Write archives into `out_dir` instead of the source directory.
    pub fn with_out_dir(mut self, out_dir: PathBuf) -> Self {
        self.out_dir = Some(out_dir);
        self
    }
}

impl ArchiveBuilder for TarballBuilder {
    fn build(&self, source_dir: &Path) -> Result<ArchiveArtifact> {
        let metadata = VersionMetadata::load(&source_dir.join("package.json")).map_err(|e| {
            RegistryError::Build {
                name: source_dir.display().to_string(),
                detail: format!("reading package.json: {e}"),
            }
        })?;
        let name = metadata.name();
        let filename = archive_filename(name, metadata.version());
        let out_dir = self.out_dir.as_deref().unwrap_or(source_dir);
        let path = out_dir.join(&filename);

        let build_err = |e: io::Error| RegistryError::Build {
            name: name.to_string(),
            detail: e.to_string(),
        };

        let count = write_tarball(source_dir, &path).map_err(build_err)?;
        let digests = ArchiveDigests::compute_file(&path).map_err(build_err)?;

        tracing::debug!(
            package = name,
            archive = %path.display(),
            files = count,
            shasum = %digests.shasum,
            "built archive"
        );

        Ok(ArchiveArtifact {
            filename,
            path,
            shasum: digests.shasum,
            integrity: digests.integrity,
        })
    }
}

fn write_tarball(source_dir: &Path, dest: &Path) -> io::Result<usize> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(dest)?);
    let encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(file, Compression::default());

    let mut tar = Builder::new(encoder);
    tar.mode(HeaderMode::Deterministic);

    let mut count = 0;
    let walker = WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path() == dest {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let entry_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let meta = entry.metadata()?;
        let mut header = Header::new_gnu();
        header.set_size(meta.len());
        header.set_mode(if is_executable(&meta) { 0o755 } else { 0o644 });
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        let data = File::open(entry.path())?;
        tar.append_data(&mut header, format!("{ENTRY_PREFIX}/{entry_path}"), data)?;
        count += 1;
    }

    let mut writer = tar.into_inner()?.finish()?;
    writer.flush()?;
    Ok(count)
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() != 1 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if SKIPPED_ENTRIES.contains(&name.as_ref()) {
        return true;
    }
    entry.file_type().is_file() && name.ends_with(&format!(".{ARCHIVE_EXTENSION}"))
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}
