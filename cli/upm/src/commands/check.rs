//! `upm check <name>`: audit a stored package.

use anyhow::{bail, Context, Result};
use upm_registry::Storage;

/// Run `upm check <name>`.
///
/// Reports manifest inconsistencies and archives whose checksum no longer
/// matches their attachment record. Fails if anything was found.
pub fn run(storage: &Storage, name: &str) -> Result<()> {
    upm_registry::validate_package_name(name).with_context(|| format!("checking {name}"))?;
    let manifest = storage
        .read_manifest(name)
        .with_context(|| format!("loading manifest for {name}"))?;

    let mut problems: Vec<String> = manifest.consistency_issues();
    let attachment_issues = storage
        .verify_attachments(&manifest)
        .with_context(|| format!("verifying archives for {name}"))?;
    problems.extend(attachment_issues.iter().map(ToString::to_string));

    if problems.is_empty() {
        println!(
            "{name}: {} version(s), latest {}, all archives verified",
            manifest.versions.len(),
            manifest.latest().unwrap_or("-")
        );
        return Ok(());
    }

    for problem in &problems {
        println!("  {problem}");
    }
    bail!("{name}: {} problem(s) found", problems.len());
}
