//! Collaborators backed by the npm and node command-line tools.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use crate::archive::{ArchiveArtifact, ArchiveBuilder};
use crate::environment::{ToolVersions, ToolchainProbe};
use crate::error::{RegistryError, Result};
use crate::publish::{FirstPublish, PublishRequest};

/// Builds archives with `npm pack --json`.
#[derive(Debug, Clone)]
pub struct NpmPackBuilder {
    program: String,
}

/// Publishes a brand-new package with `npm publish --registry <url>`.
#[derive(Debug, Clone)]
pub struct NpmPublishBootstrap {
    program: String,
}

/// Reads tool versions from `node -v` and `npm -v`.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    node: String,
    npm: String,
}

impl Default for NpmPackBuilder {
    fn default() -> Self {
        NpmPackBuilder {
            program: "npm".to_string(),
        }
    }
}

impl Default for NpmPublishBootstrap {
    fn default() -> Self {
        NpmPublishBootstrap {
            program: "npm".to_string(),
        }
    }
}

impl Default for CommandToolchain {
    fn default() -> Self {
        CommandToolchain {
            node: "node".to_string(),
            npm: "npm".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackEntry {
    filename: String,
    shasum: String,
    integrity: String,
}

impl ArchiveBuilder for NpmPackBuilder {
    fn build(&self, source_dir: &Path) -> Result<ArchiveArtifact> {
        let stdout =
            run(&self.program, &["pack", "--json"], source_dir).map_err(|detail| {
                RegistryError::Build {
                    name: source_dir.display().to_string(),
                    detail,
                }
            })?;
        parse_pack_output(&stdout, source_dir)
    }
}

/// Read the first entry of `npm pack --json` output.
pub fn parse_pack_output(stdout: &str, source_dir: &Path) -> Result<ArchiveArtifact> {
    let build_err = |detail: String| RegistryError::Build {
        name: source_dir.display().to_string(),
        detail,
    };

    let entries: Vec<PackEntry> = serde_json::from_str(stdout)
        .map_err(|e| build_err(format!("unreadable npm pack output: {e}")))?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| build_err("npm pack reported no archive".to_string()))?;

    Ok(ArchiveArtifact {
        path: source_dir.join(&entry.filename),
        filename: entry.filename,
        shasum: entry.shasum,
        integrity: entry.integrity,
    })
}

impl FirstPublish for NpmPublishBootstrap {
    fn bootstrap(&self, request: &PublishRequest<'_>) -> Result<()> {
        run(
            &self.program,
            &["publish", "--registry", request.registry_url],
            request.source_dir,
        )
        .map_err(|detail| RegistryError::Bootstrap {
            name: request.metadata.name().to_string(),
            version: request.metadata.version().to_string(),
            detail,
        })?;
        Ok(())
    }
}

impl ToolchainProbe for CommandToolchain {
    fn tool_versions(&self) -> Result<ToolVersions> {
        let probe = |tool: &str| {
            run(tool, &["-v"], Path::new("."))
                .map(|out| clean_version(&out))
                .map_err(|detail| RegistryError::Toolchain {
                    tool: tool.to_string(),
                    detail,
                })
        };
        Ok(ToolVersions {
            runtime: probe(self.node.as_str())?,
            builder: probe(self.npm.as_str())?,
        })
    }
}

/// Strip a leading `v` and surrounding whitespace from `-v` output.
pub fn clean_version(output: &str) -> String {
    let trimmed = output.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed).to_string()
}

fn run(program: &str, args: &[&str], cwd: &Path) -> std::result::Result<String, String> {
    tracing::debug!(program, ?args, cwd = %cwd.display(), "running command");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| format!("could not run {program}: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{program} {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pack_json() {
        let stdout = r#"[
  {
    "id": "foo@1.1.0",
    "name": "foo",
    "version": "1.1.0",
    "size": 312,
    "filename": "foo-1.1.0.tgz",
    "shasum": "2b7d0c1e4d3f5a6b7c8d9e0f1a2b3c4d5e6f7a8b",
    "integrity": "sha512-AAAA",
    "files": []
  }
]"#;
        let artifact = parse_pack_output(stdout, Path::new("/src/foo")).unwrap();
        assert_eq!(artifact.filename, "foo-1.1.0.tgz");
        assert_eq!(artifact.path, Path::new("/src/foo/foo-1.1.0.tgz"));
        assert_eq!(artifact.shasum, "2b7d0c1e4d3f5a6b7c8d9e0f1a2b3c4d5e6f7a8b");
        assert_eq!(artifact.integrity, "sha512-AAAA");
    }

    #[test]
    fn empty_pack_output_is_build_failure() {
        let err = parse_pack_output("[]", Path::new(".")).unwrap_err();
        assert!(matches!(err, RegistryError::Build { .. }));
    }

    #[test]
    fn garbage_pack_output_is_build_failure() {
        let err = parse_pack_output("npm WARN something", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("unreadable"));
    }

    #[test]
    fn clean_version_strips_prefix_and_newlines() {
        assert_eq!(clean_version("v20.11.0\r\n"), "20.11.0");
        assert_eq!(clean_version("10.2.4\n"), "10.2.4");
    }

    #[test]
    fn missing_program_is_reported() {
        let toolchain = CommandToolchain {
            node: "upm-test-no-such-node".to_string(),
            npm: "upm-test-no-such-npm".to_string(),
        };
        let err = toolchain.tool_versions().unwrap_err();
        assert!(matches!(err, RegistryError::Toolchain { .. }));
    }
}
