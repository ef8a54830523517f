//! Publication workflow.
//!
//! Sequences status probing, archive building, artifact placement and
//! manifest reconciliation into one publish. The probe result picks exactly
//! one terminal path:
//!
//! - `Published` → nothing is touched.
//! - `NotExist` → the injected [`FirstPublish`] bootstrap handles the package.
//! - `NotPublished` → build, merge, place the archive, then rewrite the manifest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::{archive_filename, ArchiveArtifact, ArchiveBuilder};
use crate::error::{RegistryError, Result};
use crate::lock::{PackageLock, DEFAULT_LOCK_TIMEOUT};
use crate::metadata::VersionMetadata;
use crate::probe::{PackageStatus, RegistryProber, StorageProber};
use crate::reconcile::Reconciler;
use crate::storage::Storage;

/// Result of a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The version was already in storage; nothing changed.
    AlreadyPublished,
    /// A new version was merged; carries the package directory.
    Published(PathBuf),
    /// The package did not exist and the first-publish bootstrap ran.
    FirstVersionPublished,
}

/// Everything a publish acts on.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'r> {
    pub metadata: &'r VersionMetadata,
    pub registry_url: &'r str,
    pub storage: &'r Storage,
    pub source_dir: &'r Path,
}

/// Publishes a package that has no storage directory yet.
pub trait FirstPublish {
    fn bootstrap(&self, request: &PublishRequest<'_>) -> Result<()>;
}

/// First publish performed locally: build, create the manifest, place the
/// archive, then write the manifest.
pub struct LocalBootstrap<'a> {
    builder: &'a dyn ArchiveBuilder,
    reconciler: &'a Reconciler<'a>,
}

impl<'a> LocalBootstrap<'a> {
    pub fn new(builder: &'a dyn ArchiveBuilder, reconciler: &'a Reconciler<'a>) -> Self {
        LocalBootstrap {
            builder,
            reconciler,
        }
    }
}

impl FirstPublish for LocalBootstrap<'_> {
    fn bootstrap(&self, request: &PublishRequest<'_>) -> Result<()> {
        let metadata = request.metadata;
        let (name, version) = (metadata.name(), metadata.version());

        let artifact = self.builder.build(request.source_dir)?;
        check_artifact_name(metadata, &artifact)?;

        let manifest = self
            .reconciler
            .create_manifest(metadata, &artifact, request.registry_url)?;
        let document = manifest.to_json_pretty()?;

        let dir = request.storage.create_package_dir(name)?;
        let written = request
            .storage
            .place_artifact(&artifact, name, version)
            .and_then(|_| request.storage.write_manifest(name, version, &document));

        // A package directory without a manifest would fail every later publish.
        if let Err(e) = written {
            discard_package_dir(&dir, name);
            return Err(e);
        }
        Ok(())
    }
}

fn discard_package_dir(dir: &Path, name: &str) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::debug!(
            package = name,
            dir = %dir.display(),
            "removed incomplete package directory"
        ),
        Err(e) => tracing::error!(
            package = name,
            dir = %dir.display(),
            error = %e,
            "could not remove incomplete package directory"
        ),
    }
}

/// Orchestrates one publish against a storage root.
pub struct Publisher<'a> {
    source_dir: PathBuf,
    prober: &'a dyn RegistryProber,
    builder: &'a dyn ArchiveBuilder,
    bootstrap: &'a dyn FirstPublish,
    reconciler: &'a Reconciler<'a>,
    lock_timeout: Duration,
}

impl<'a> Publisher<'a> {
    /// A publisher for the package in `source_dir`, probing storage directly.
    pub fn new(
        source_dir: PathBuf,
        builder: &'a dyn ArchiveBuilder,
        bootstrap: &'a dyn FirstPublish,
        reconciler: &'a Reconciler<'a>,
    ) -> Self {
        Publisher {
            source_dir,
            prober: &StorageProber,
            builder,
            bootstrap,
            reconciler,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Use a different status prober.
    pub fn with_prober(mut self, prober: &'a dyn RegistryProber) -> Self {
        self.prober = prober;
        self
    }

    /// Set how long to wait for another publish of the same package.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Publish `metadata` into `storage`.
    ///
    /// The first probe runs without the lock so a duplicate publish
    /// touches nothing. Any other status is re-probed under the lock.
    pub fn publish(
        &self,
        metadata: &VersionMetadata,
        registry_url: &str,
        storage: &Storage,
    ) -> Result<PublishOutcome> {
        let (name, version) = (metadata.name(), metadata.version());

        if self.prober.probe(name, version, storage)? == PackageStatus::Published {
            tracing::warn!(package = name, version, "version already published");
            return Ok(PublishOutcome::AlreadyPublished);
        }

        let _lock = PackageLock::acquire(storage, name, self.lock_timeout)?;
        let request = PublishRequest {
            metadata,
            registry_url,
            storage,
            source_dir: &self.source_dir,
        };

        match self.prober.probe(name, version, storage)? {
            PackageStatus::Published => {
                tracing::warn!(package = name, version, "version already published");
                Ok(PublishOutcome::AlreadyPublished)
            }
            PackageStatus::NotExist => {
                tracing::info!(package = name, version, "first publish of package");
                self.bootstrap.bootstrap(&request)?;
                Ok(PublishOutcome::FirstVersionPublished)
            }
            PackageStatus::NotPublished => self.publish_new_version(&request),
        }
    }

    fn publish_new_version(&self, request: &PublishRequest<'_>) -> Result<PublishOutcome> {
        let (metadata, storage) = (request.metadata, request.storage);
        let (name, version) = (metadata.name(), metadata.version());

        let artifact = self.builder.build(request.source_dir)?;
        check_artifact_name(metadata, &artifact)?;

        let existing = storage.read_manifest(name)?;
        let merged = self.reconciler.merge_version(
            &existing,
            metadata,
            &artifact,
            request.registry_url,
        )?;
        let document = merged.to_json_pretty()?;

        storage.place_artifact(&artifact, name, version)?;
        write_manifest_loudly(storage, name, version, &document)?;

        let package_dir = storage.package_dir(name);
        tracing::info!(
            package = name,
            version,
            dir = %package_dir.display(),
            "published version"
        );
        Ok(PublishOutcome::Published(package_dir))
    }
}

/// The prober finds archives by `<name>-<version>.tgz`; anything else would
/// make the version invisible to later duplicate checks.
fn check_artifact_name(metadata: &VersionMetadata, artifact: &ArchiveArtifact) -> Result<()> {
    let expected = archive_filename(metadata.name(), metadata.version());
    if artifact.filename != expected {
        return Err(RegistryError::Build {
            name: metadata.name().to_string(),
            detail: format!("archive is named {}, expected {expected}", artifact.filename),
        });
    }
    Ok(())
}

fn write_manifest_loudly(
    storage: &Storage,
    name: &str,
    version: &str,
    document: &str,
) -> Result<()> {
    storage.write_manifest(name, version, document).map_err(|e| {
        tracing::error!(
            package = name,
            version,
            error = %e,
            "archive placed but manifest not written"
        );
        e
    })?;
    Ok(())
}
