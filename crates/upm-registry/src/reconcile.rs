//! Manifest reconciliation.
//!
//! Produces the next manifest document from the current one (if any), the
//! new version's metadata and the freshly built archive. Both entry points
//! are pure apart from one clock read, one README read and one tool-version
//! probe per call.

use indexmap::IndexMap;
use serde_json::Map;

use crate::archive::ArchiveArtifact;
use crate::environment::{format_timestamp, Clock, ReadmeSource, ToolchainProbe, README_FILENAME};
use crate::error::{RegistryError, Result};
use crate::manifest::{
    Attachment, Dist, PackageManifest, TimeMap, VersionEntry, VersionRecord, LATEST_TAG,
};
use crate::metadata::VersionMetadata;

/// Builds and merges package manifests.
pub struct Reconciler<'a> {
    clock: &'a dyn Clock,
    readme: &'a dyn ReadmeSource,
    toolchain: &'a dyn ToolchainProbe,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        clock: &'a dyn Clock,
        readme: &'a dyn ReadmeSource,
        toolchain: &'a dyn ToolchainProbe,
    ) -> Self {
        Reconciler {
            clock,
            readme,
            toolchain,
        }
    }

    /// Build the manifest for a package's first version.
    pub fn create_manifest(
        &self,
        metadata: &VersionMetadata,
        artifact: &ArchiveArtifact,
        registry_url: &str,
    ) -> Result<PackageManifest> {
        let entry = self.version_entry(metadata, artifact, registry_url)?;
        let now = format_timestamp(self.clock.now());
        let name = metadata.name();
        let version = metadata.version();

        let mut versions = IndexMap::new();
        versions.insert(version.to_string(), entry);

        let mut dist_tags = IndexMap::new();
        dist_tags.insert(LATEST_TAG.to_string(), version.to_string());

        let mut attachments = IndexMap::new();
        attachments.insert(artifact.filename.clone(), attachment(artifact, version));

        Ok(PackageManifest {
            name: name.to_string(),
            versions,
            time: TimeMap::new(&now, version),
            users: Map::new(),
            dist_tags,
            uplinks: Map::new(),
            distfiles: Map::new(),
            attachments,
            id: Some(name.to_string()),
            rev: None,
            readme: self.readme.read(),
            extra: Map::new(),
        })
    }

    /// Merge a new version into an existing manifest.
    ///
    /// Existing version entries are kept exactly as read; the entry for the
    /// metadata's version is inserted or replaced, `latest` moves to it
    /// unconditionally, and `time.modified` equals the new version's time.
    pub fn merge_version(
        &self,
        existing: &PackageManifest,
        metadata: &VersionMetadata,
        artifact: &ArchiveArtifact,
        registry_url: &str,
    ) -> Result<PackageManifest> {
        if existing.name != metadata.name() {
            return Err(RegistryError::invalid_metadata(format!(
                "metadata names package '{}' but the manifest belongs to '{}'",
                metadata.name(),
                existing.name
            )));
        }

        let entry = self.version_entry(metadata, artifact, registry_url)?;
        let now = format_timestamp(self.clock.now());
        let version = metadata.version();
        let mut next = existing.clone();

        next.versions.insert(version.to_string(), entry);

        next.time.modified = now.clone();
        next.time.versions.insert(version.to_string(), now);

        next.dist_tags.insert(LATEST_TAG.to_string(), version.to_string());

        next.attachments
            .insert(artifact.filename.clone(), attachment(artifact, version));

        next.readme = self.readme.read();
        next.uplinks = Map::new();
        next.distfiles = Map::new();

        Ok(next)
    }

    fn version_entry(
        &self,
        metadata: &VersionMetadata,
        artifact: &ArchiveArtifact,
        registry_url: &str,
    ) -> Result<VersionEntry> {
        let tools = self.toolchain.tool_versions()?;
        let record = VersionRecord {
            metadata: metadata.opaque_fields(),
            id: metadata.id(),
            readme_filename: Some(README_FILENAME.to_string()),
            runtime_version: Some(tools.runtime),
            builder_version: Some(tools.builder),
            dist: Dist {
                integrity: Some(artifact.integrity.clone()),
                shasum: artifact.shasum.clone(),
                tarball: tarball_url(registry_url, metadata.name(), &artifact.filename),
                extra: Map::new(),
            },
            contributors: Some(Vec::new()),
        };
        Ok(VersionEntry::from(record))
    }
}

fn attachment(artifact: &ArchiveArtifact, version: &str) -> Attachment {
    Attachment {
        shasum: artifact.shasum.clone(),
        version: version.to_string(),
    }
}

/// `<registry>/<name>/-/<filename>`, ignoring a trailing `/` on the registry.
pub fn tarball_url(registry_url: &str, name: &str, filename: &str) -> String {
    format!(
        "{}/{}/-/{}",
        registry_url.trim_end_matches('/'),
        name,
        filename
    )
}
