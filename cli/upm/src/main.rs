//! upm CLI: publish packages into a file-system backed registry.

mod commands;
mod config;

use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{BootstrapKind, Overrides, PackerKind, Settings, UpmConfig};

#[derive(Parser)]
#[command(name = "upm", version, about = "Publish packages into a local file-system registry")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Registry storage root
    #[arg(long, env = "UPM_STORAGE", global = true)]
    storage: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the package in the source directory
    Publish {
        /// Registry base URL used in tarball links
        #[arg(long, env = "UPM_REGISTRY")]
        registry: Option<String>,
        /// Package source directory (default: current directory)
        #[arg(long)]
        source: Option<PathBuf>,
        /// Archive packer
        #[arg(long, value_enum)]
        packer: Option<PackerKind>,
        /// First-publish strategy for packages not yet in storage
        #[arg(long, value_enum)]
        bootstrap: Option<BootstrapKind>,
    },
    /// Report whether the source package's version is in storage
    Status {
        /// Package source directory (default: current directory)
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Check a stored package's manifest against its archives
    Check {
        /// Package name
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

/// Logs go to stderr so stdout carries only status lines. `RUST_LOG`
/// overrides the `-v` level.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let config = UpmConfig::find_and_load(&cwd)?;
    if let Some((_, dir)) = &config {
        tracing::debug!(dir = %dir.display(), "loaded {}", config::CONFIG_FILENAME);
    }

    match cli.command {
        Commands::Publish {
            registry,
            source,
            packer,
            bootstrap,
        } => {
            let overrides = Overrides {
                storage: cli.storage,
                registry,
                packer,
                bootstrap,
            };
            let settings = Settings::resolve(&overrides, config.as_ref())?;
            let source_dir = source_dir_or(source, &cwd);
            commands::publish::run(&source_dir, &settings).map(|_| ())
        }

        Commands::Status { source } => {
            let settings = resolve_storage_only(cli.storage, config.as_ref())?;
            let source_dir = source_dir_or(source, &cwd);
            commands::status::run(&source_dir, &settings.storage).map(|_| ())
        }

        Commands::Check { name } => {
            let settings = resolve_storage_only(cli.storage, config.as_ref())?;
            commands::check::run(&settings.storage, &name)
        }
    }
}

fn resolve_storage_only(
    storage: Option<String>,
    config: Option<&(UpmConfig, PathBuf)>,
) -> anyhow::Result<Settings> {
    let overrides = Overrides {
        storage,
        ..Overrides::default()
    };
    Settings::resolve(&overrides, config)
}

fn source_dir_or(source: Option<PathBuf>, cwd: &Path) -> PathBuf {
    match source {
        Some(dir) if dir.is_relative() => cwd.join(dir),
        Some(dir) => dir,
        None => cwd.to_path_buf(),
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use upm_registry::{PackageStatus, PublishOutcome};

    fn write_package(dir: &Path, version: &str) {
        std::fs::write(
            dir.join("package.json"),
            format!("{{\n  \"name\": \"widget\",\n  \"version\": \"{version}\"\n}}\n"),
        )
        .unwrap();
    }

    fn settings_for(storage: &Path) -> Settings {
        let config = UpmConfig::from_str(&format!(
            "[registry]\nurl = \"http://localhost:4873/\"\nstorage = \"{}\"\n\n[toolchain]\nnode = \"20.11.0\"\nnpm = \"10.2.4\"\n",
            storage.display()
        ))
        .unwrap();
        Settings::resolve(&Overrides::default(), Some(&(config, storage.to_path_buf()))).unwrap()
    }

    /// Full workflow: first publish → second version → duplicate → check.
    #[test]
    fn publish_status_check_workflow() {
        let storage_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        std::fs::write(source_dir.path().join("index.js"), "exports.ok = true;\n").unwrap();
        write_package(source_dir.path(), "0.1.0");
        let settings = settings_for(storage_dir.path());

        // 1. Unknown package
        let status = commands::status::run(source_dir.path(), &settings.storage).unwrap();
        assert_eq!(status, PackageStatus::NotExist);

        // 2. First publish
        let outcome = commands::publish::run(source_dir.path(), &settings).unwrap();
        assert_eq!(outcome, PublishOutcome::FirstVersionPublished);

        // 3. Next version
        write_package(source_dir.path(), "0.2.0");
        assert_eq!(
            commands::status::run(source_dir.path(), &settings.storage).unwrap(),
            PackageStatus::NotPublished
        );
        let outcome = commands::publish::run(source_dir.path(), &settings).unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::Published(storage_dir.path().join("widget"))
        );

        // 4. Duplicate
        let outcome = commands::publish::run(source_dir.path(), &settings).unwrap();
        assert_eq!(outcome, PublishOutcome::AlreadyPublished);

        // 5. Check
        commands::check::run(&settings.storage, "widget").unwrap();

        let manifest = settings.storage.read_manifest("widget").unwrap();
        let record = manifest.versions["0.2.0"].record().unwrap();
        assert_eq!(
            record.dist.tarball,
            "http://localhost:4873/widget/-/widget-0.2.0.tgz"
        );
        assert_eq!(record.runtime_version.as_deref(), Some("20.11.0"));
    }

    #[test]
    fn publish_without_package_json_fails() {
        let storage_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let settings = settings_for(storage_dir.path());

        let err = commands::publish::run(source_dir.path(), &settings).unwrap_err();
        assert!(err.to_string().contains("no package.json"));
    }

    #[test]
    fn publish_requires_registry_url() {
        let storage_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        write_package(source_dir.path(), "1.0.0");
        let settings = resolve_storage_only(
            Some(storage_dir.path().display().to_string()),
            None,
        )
        .unwrap();

        let err = commands::publish::run(source_dir.path(), &settings).unwrap_err();
        assert!(format!("{err:#}").contains("registry URL"));
        assert!(!storage_dir.path().join("widget").exists());
    }

    #[test]
    fn check_reports_tampered_archive() {
        let storage_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        write_package(source_dir.path(), "1.0.0");
        let settings = settings_for(storage_dir.path());
        commands::publish::run(source_dir.path(), &settings).unwrap();

        std::fs::write(storage_dir.path().join("widget/widget-1.0.0.tgz"), b"junk").unwrap();
        let err = commands::check::run(&settings.storage, "widget").unwrap_err();
        assert!(err.to_string().contains("1 problem"));
    }

    #[test]
    fn check_unknown_package_fails() {
        let storage_dir = tempfile::tempdir().unwrap();
        let settings = settings_for(storage_dir.path());
        assert!(commands::check::run(&settings.storage, "ghost").is_err());
    }

    #[test]
    fn check_rejects_path_like_name() {
        let storage_dir = tempfile::tempdir().unwrap();
        let settings = settings_for(storage_dir.path());
        let err = commands::check::run(&settings.storage, "../widget").unwrap_err();
        assert!(format!("{err:#}").contains("invalid version metadata"));
    }

    #[test]
    fn relative_source_joins_cwd() {
        let cwd = Path::new("/work");
        assert_eq!(
            source_dir_or(Some(PathBuf::from("pkg")), cwd),
            PathBuf::from("/work/pkg")
        );
        assert_eq!(source_dir_or(None, cwd), PathBuf::from("/work"));
    }
}
