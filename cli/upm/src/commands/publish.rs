//! `upm publish`: build the source package and publish it into storage.

use std::path::Path;

use anyhow::{bail, Context, Result};
use upm_registry::storage::MANIFEST_FILENAME;
use upm_registry::{
    ArchiveBuilder, CommandToolchain, FileReadme, FirstPublish, LocalBootstrap, NpmPackBuilder,
    NpmPublishBootstrap, PublishOutcome, Publisher, Reconciler, RegistryError, SystemClock,
    TarballBuilder, ToolVersions, ToolchainProbe, VersionMetadata,
};

use crate::config::{BootstrapKind, PackerKind, Settings, ToolchainSection};

/// Load the version metadata from `<source_dir>/package.json`.
pub fn load_source_metadata(source_dir: &Path) -> Result<VersionMetadata> {
    let path = source_dir.join(MANIFEST_FILENAME);
    if !path.is_file() {
        bail!("no {MANIFEST_FILENAME} found in {}", source_dir.display());
    }
    VersionMetadata::load(&path).with_context(|| format!("reading {}", path.display()))
}

/// Run `upm publish`.
pub fn run(source_dir: &Path, settings: &Settings) -> Result<PublishOutcome> {
    let metadata = load_source_metadata(source_dir)?;
    let registry_url = settings.registry_url()?;

    let clock = SystemClock;
    let readme = FileReadme::in_dir(source_dir);
    let commands = CommandToolchain::default();
    let tools = ConfiguredToolchain::new(&settings.toolchain, &commands);
    let reconciler = Reconciler::new(&clock, &readme, &tools);

    let native = TarballBuilder::new();
    let npm_pack = NpmPackBuilder::default();
    let builder: &dyn ArchiveBuilder = match settings.packer {
        PackerKind::Native => &native,
        PackerKind::Npm => &npm_pack,
    };

    let local = LocalBootstrap::new(builder, &reconciler);
    let npm_publish = NpmPublishBootstrap::default();
    let bootstrap: &dyn FirstPublish = match settings.bootstrap {
        BootstrapKind::Local => &local,
        BootstrapKind::Npm => &npm_publish,
    };

    let publisher = Publisher::new(source_dir.to_path_buf(), builder, bootstrap, &reconciler)
        .with_lock_timeout(settings.lock_timeout);
    let outcome = publisher
        .publish(&metadata, registry_url, &settings.storage)
        .with_context(|| format!("publishing {}", metadata.id()))?;

    match &outcome {
        PublishOutcome::AlreadyPublished => {
            println!("Version already published: {}", metadata.id());
        }
        PublishOutcome::Published(dir) => {
            println!("Published {} to {}", metadata.id(), dir.display());
        }
        PublishOutcome::FirstVersionPublished => {
            println!("Published first version {}", metadata.id());
        }
    }
    Ok(outcome)
}

/// Configured versions win; anything missing is read from the fallback,
/// which only runs when a version entry is actually built.
struct ConfiguredToolchain<'a> {
    section: &'a ToolchainSection,
    fallback: &'a dyn ToolchainProbe,
}

impl<'a> ConfiguredToolchain<'a> {
    fn new(section: &'a ToolchainSection, fallback: &'a dyn ToolchainProbe) -> Self {
        ConfiguredToolchain { section, fallback }
    }
}

impl ToolchainProbe for ConfiguredToolchain<'_> {
    fn tool_versions(&self) -> upm_registry::Result<ToolVersions> {
        if let Some(fixed) = self.section.fixed() {
            return Ok(fixed);
        }
        let detected = self.fallback.tool_versions().map_err(|e| match e {
            RegistryError::Toolchain { tool, detail } => RegistryError::Toolchain {
                tool,
                detail: format!("{detail} (set [toolchain] node/npm in upm.toml to skip)"),
            },
            other => other,
        })?;
        Ok(ToolVersions {
            runtime: self.section.node.clone().unwrap_or(detected.runtime),
            builder: self.section.npm.clone().unwrap_or(detected.builder),
        })
    }
}
