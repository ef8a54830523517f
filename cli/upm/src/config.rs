//! `upm.toml` configuration and settings resolution.
//!
//! Values come from, in order of precedence: command-line flags,
//! environment variables (handled by clap), `upm.toml`, built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use upm_registry::lock::DEFAULT_LOCK_TIMEOUT;
use upm_registry::{Storage, ToolVersions};

/// Configuration filename searched for from the working directory upward.
pub const CONFIG_FILENAME: &str = "upm.toml";

/// The parsed `upm.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpmConfig {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub toolchain: ToolchainSection,
}

/// `[registry]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Registry base URL used in tarball links.
    #[serde(default)]
    pub url: Option<String>,
    /// Storage root; relative paths resolve against the config file's directory.
    #[serde(default)]
    pub storage: Option<String>,
}

/// `[publish]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishSection {
    #[serde(default)]
    pub packer: Option<PackerKind>,
    #[serde(default)]
    pub bootstrap: Option<BootstrapKind>,
    /// Seconds to wait for another publish of the same package.
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,
}

/// `[toolchain]` section; overrides `node -v` / `npm -v`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolchainSection {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub npm: Option<String>,
}

impl ToolchainSection {
    /// Static tool versions when both are configured.
    pub fn fixed(&self) -> Option<ToolVersions> {
        match (&self.node, &self.npm) {
            (Some(node), Some(npm)) => Some(ToolVersions {
                runtime: node.clone(),
                builder: npm.clone(),
            }),
            _ => None,
        }
    }
}

/// How archives are built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PackerKind {
    /// Built-in gzip-tar packer.
    #[default]
    Native,
    /// `npm pack --json`.
    Npm,
}

/// How a package's first version is published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapKind {
    /// Create the package directory and manifest directly.
    #[default]
    Local,
    /// `npm publish --registry <url>`.
    Npm,
}

impl UpmConfig {
    /// Search upward from `start_dir` for `upm.toml`, returning it along with
    /// the directory it was found in.
    pub fn find_and_load(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILENAME);
            if candidate.is_file() {
                let content = std::fs::read_to_string(&candidate)
                    .with_context(|| format!("reading {}", candidate.display()))?;
                let config: UpmConfig = toml::from_str(&content)
                    .with_context(|| format!("parsing {}", candidate.display()))?;
                return Ok(Some((config, dir)));
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    /// Parse a config from a TOML string.
    #[cfg(test)]
    pub fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing upm.toml")
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub storage: Option<String>,
    pub registry: Option<String>,
    pub packer: Option<PackerKind>,
    pub bootstrap: Option<BootstrapKind>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage: Storage,
    registry_url: Option<String>,
    pub packer: PackerKind,
    pub bootstrap: BootstrapKind,
    pub lock_timeout: Duration,
    pub toolchain: ToolchainSection,
}

impl Settings {
    /// Merge overrides with an optional config file (and its directory).
    pub fn resolve(overrides: &Overrides, config: Option<&(UpmConfig, PathBuf)>) -> Result<Self> {
        let (file, config_dir) = match config {
            Some((file, dir)) => (file.clone(), Some(dir.as_path())),
            None => (UpmConfig::default(), None),
        };

        let storage = match (&overrides.storage, &file.registry.storage) {
            (Some(cli), _) => cli.clone(),
            (None, Some(configured)) => resolve_relative(configured, config_dir),
            (None, None) => anyhow::bail!(
                "no storage root given (use --storage, UPM_STORAGE, or [registry] storage in {CONFIG_FILENAME})"
            ),
        };

        Ok(Settings {
            storage: Storage::from_root_str(&storage),
            registry_url: overrides.registry.clone().or(file.registry.url),
            packer: overrides.packer.or(file.publish.packer).unwrap_or_default(),
            bootstrap: overrides
                .bootstrap
                .or(file.publish.bootstrap)
                .unwrap_or_default(),
            lock_timeout: file
                .publish
                .lock_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LOCK_TIMEOUT),
            toolchain: file.toolchain,
        })
    }

    /// The registry base URL, required for publishing.
    pub fn registry_url(&self) -> Result<&str> {
        self.registry_url.as_deref().with_context(|| {
            format!("no registry URL given (use --registry, UPM_REGISTRY, or [registry] url in {CONFIG_FILENAME})")
        })
    }
}

fn resolve_relative(path: &str, base: Option<&Path>) -> String {
    match base {
        Some(dir) if Path::new(path).is_relative() => dir.join(path).to_string_lossy().into_owned(),
        _ => path.to_string(),
    }
}
