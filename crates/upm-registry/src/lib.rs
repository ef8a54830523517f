//! Publication engine for file-system backed package registries.
//!
//! Packs source trees into archives, computes their digests, and merges each
//! new version into the package's registry manifest on disk, without a live
//! registry server.
//!
//! # Architecture
//!
//! A publish flows one way through four components:
//! - **Prober**: storage presence checks decide the package status
//! - **Archive builder**: packs the source tree (native or `npm pack`)
//! - **Reconciler**: creates or merges the manifest document
//! - **Publisher**: sequences the above, places the archive, then writes
//!   the manifest
//!
//! Every collaborator sits behind a trait so the workflow runs against
//! in-memory fakes in tests.

pub mod archive;
pub mod environment;
pub mod error;
pub mod integrity;
pub mod lock;
pub mod manifest;
pub mod metadata;
pub mod npm;
pub mod probe;
pub mod publish;
pub mod reconcile;
pub mod storage;

// Re-exports for convenience.
pub use archive::{archive_filename, ArchiveArtifact, ArchiveBuilder, TarballBuilder};
pub use environment::{
    Clock, FileReadme, FixedClock, ReadmeSource, StaticReadme, SystemClock, ToolVersions,
    ToolchainProbe,
};
pub use error::{RegistryError, Result};
pub use integrity::ArchiveDigests;
pub use lock::PackageLock;
pub use manifest::{PackageManifest, VersionEntry, VersionRecord};
pub use metadata::{validate_package_name, VersionMetadata};
pub use npm::{CommandToolchain, NpmPackBuilder, NpmPublishBootstrap};
pub use probe::{PackageStatus, RegistryProber, StorageProber};
pub use publish::{FirstPublish, LocalBootstrap, PublishOutcome, PublishRequest, Publisher};
pub use reconcile::Reconciler;
pub use storage::{normalize_storage_root, AttachmentIssue, Storage};
