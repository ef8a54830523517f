//! `upm status`: where the source package's version stands in storage.

use std::path::Path;

use anyhow::{Context, Result};
use upm_registry::{PackageStatus, RegistryProber, Storage, StorageProber};

use super::publish::load_source_metadata;

/// Run `upm status`.
pub fn run(source_dir: &Path, storage: &Storage) -> Result<PackageStatus> {
    let metadata = load_source_metadata(source_dir)?;
    let status = StorageProber
        .probe(metadata.name(), metadata.version(), storage)
        .with_context(|| format!("probing {}", metadata.id()))?;

    println!("{}: {status}", metadata.id());
    Ok(status)
}
