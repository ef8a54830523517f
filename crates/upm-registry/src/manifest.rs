//! The per-package registry manifest document.
//!
//! One manifest exists per package name, stored as pretty-printed JSON in
//! `<storage>/<name>/package.json`. Its shape mirrors the usual registry
//! record: `versions`, `time`, `dist-tags` and `_attachments` mappings plus
//! the embedded README. Unknown top-level keys are carried forward verbatim.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::archive::archive_filename;
use crate::error::{RegistryError, Result};
use crate::metadata::json_kind;

/// Top-level keys that must be present in a persisted manifest.
pub const REQUIRED_KEYS: &[&str] = &["name", "versions", "time", "_attachments"];

/// The dist-tag that tracks the most recent publish.
pub const LATEST_TAG: &str = "latest";

/// A complete package manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package name; never changes once created.
    pub name: String,
    /// Published versions keyed by exact version string.
    pub versions: IndexMap<String, VersionEntry>,
    /// Creation, modification and per-version publish timestamps.
    pub time: TimeMap,
    #[serde(default)]
    pub users: Map<String, Value>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: IndexMap<String, String>,
    #[serde(rename = "_uplinks", default)]
    pub uplinks: Map<String, Value>,
    #[serde(rename = "_distfiles", default)]
    pub distfiles: Map<String, Value>,
    /// Archive filename → attachment record.
    #[serde(rename = "_attachments")]
    pub attachments: IndexMap<String, Attachment>,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// README text, re-embedded on every write.
    #[serde(default)]
    pub readme: String,
    /// Top-level keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `time` mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeMap {
    /// Set once when the manifest is first created.
    pub created: String,
    /// Set on every write.
    pub modified: String,
    /// Version string → publish timestamp.
    #[serde(flatten)]
    pub versions: IndexMap<String, String>,
}

impl TimeMap {
    /// A time map where `created`, `modified` and `version` all share `now`.
    pub fn new(now: &str, version: &str) -> Self {
        let mut versions = IndexMap::new();
        versions.insert(version.to_string(), now.to_string());
        TimeMap {
            created: now.to_string(),
            modified: now.to_string(),
            versions,
        }
    }
}

/// A version entry as stored in the manifest.
///
/// Held as the raw JSON object, so entries written by other tools keep their
/// key order when the manifest is rewritten. [`VersionEntry::record`] decodes
/// a typed view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionEntry(Map<String, Value>);

impl VersionEntry {
    /// All fields in stored order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `_id` field, `<name>@<version>`.
    pub fn id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }

    /// The entry's version string, if present.
    pub fn version(&self) -> Option<&str> {
        self.0.get("version").and_then(Value::as_str)
    }

    /// Decode the entry into a typed [`VersionRecord`].
    pub fn record(&self) -> Result<VersionRecord> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }
}

impl From<VersionRecord> for VersionEntry {
    /// Caller metadata first, then the derived fields in a fixed order.
    fn from(record: VersionRecord) -> Self {
        let mut fields = record.metadata;
        fields.insert("_id".to_string(), Value::String(record.id));
        if let Some(filename) = record.readme_filename {
            fields.insert("readmeFilename".to_string(), Value::String(filename));
        }
        if let Some(runtime) = record.runtime_version {
            fields.insert("_nodeVersion".to_string(), Value::String(runtime));
        }
        if let Some(builder) = record.builder_version {
            fields.insert("_npmVersion".to_string(), Value::String(builder));
        }
        fields.insert("dist".to_string(), Value::Object(record.dist.into_fields()));
        if let Some(contributors) = record.contributors {
            fields.insert("contributors".to_string(), Value::Array(contributors));
        }
        VersionEntry(fields)
    }
}

/// One published version, typed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VersionRecord {
    /// Caller metadata, opaque apart from `name` and `version`.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
    /// `<name>@<version>`.
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "readmeFilename", default)]
    pub readme_filename: Option<String>,
    /// Runtime tool version (node).
    #[serde(rename = "_nodeVersion", default)]
    pub runtime_version: Option<String>,
    /// Builder tool version (npm).
    #[serde(rename = "_npmVersion", default)]
    pub builder_version: Option<String>,
    pub dist: Dist,
    #[serde(default)]
    pub contributors: Option<Vec<Value>>,
}

impl VersionRecord {
    /// The record's version string, if the metadata carries one.
    pub fn version(&self) -> Option<&str> {
        self.metadata.get("version").and_then(Value::as_str)
    }
}

/// Download coordinates of a version's archive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub integrity: Option<String>,
    pub shasum: String,
    pub tarball: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dist {
    fn into_fields(self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(integrity) = self.integrity {
            fields.insert("integrity".to_string(), Value::String(integrity));
        }
        fields.insert("shasum".to_string(), Value::String(self.shasum));
        fields.insert("tarball".to_string(), Value::String(self.tarball));
        fields.extend(self.extra);
        fields
    }
}

/// An `_attachments` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub shasum: String,
    pub version: String,
}

impl PackageManifest {
    /// Parse a manifest from a JSON string.
    pub fn parse(input: &str) -> Result<Self> {
        Self::decode(input, Path::new("<inline>"))
    }

    /// Load a manifest from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::decode(&content, path)
    }

    fn decode(input: &str, path: &Path) -> Result<Self> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| RegistryError::malformed(path, format!("invalid JSON: {e}")))?;

        let Value::Object(object) = &value else {
            return Err(RegistryError::malformed(
                path,
                format!("expected a JSON object, found {}", json_kind(&value)),
            ));
        };

        for key in REQUIRED_KEYS {
            match object.get(*key) {
                None => {
                    return Err(RegistryError::malformed(
                        path,
                        format!("missing required key '{key}'"),
                    ))
                }
                Some(Value::Object(_)) if *key != "name" => {}
                Some(Value::String(_)) if *key == "name" => {}
                Some(other) => {
                    return Err(RegistryError::malformed(
                        path,
                        format!("'{key}' has the wrong type ({})", json_kind(other)),
                    ))
                }
            }
        }

        serde_json::from_value(value).map_err(|e| RegistryError::malformed(path, e.to_string()))
    }

    /// Serialize with 2-space indentation and a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// The version currently tagged `latest`.
    pub fn latest(&self) -> Option<&str> {
        self.dist_tags.get(LATEST_TAG).map(String::as_str)
    }

    /// Report violations of the manifest invariants.
    ///
    /// Every version needs a `time` entry, an attachment that names it,
    /// and an archive filename of the form `<name>-<version>.tgz`.
    pub fn consistency_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for (version, record) in &self.versions {
            if !self.time.versions.contains_key(version) {
                issues.push(format!("version {version} has no time entry"));
            }

            let expected_id = format!("{}@{}", self.name, version);
            match record.id() {
                Some(id) if id == expected_id => {}
                Some(id) => issues.push(format!(
                    "version {version} has id '{id}', expected '{expected_id}'"
                )),
                None => issues.push(format!("version {version} has no _id")),
            }

            let attachments: Vec<&String> = self
                .attachments
                .iter()
                .filter(|(_, a)| a.version == *version)
                .map(|(filename, _)| filename)
                .collect();
            if attachments.is_empty() {
                issues.push(format!("version {version} has no attachment"));
                continue;
            }

            let expected_file = archive_filename(&self.name, version);
            if !attachments.iter().any(|f| **f == expected_file) {
                issues.push(format!(
                    "version {version} has no attachment named {expected_file}"
                ));
            }
        }

        match self.latest() {
            Some(latest) if !self.versions.contains_key(latest) => {
                issues.push(format!("dist-tags.latest points at unknown version {latest}"));
            }
            None if !self.versions.is_empty() => {
                issues.push("dist-tags.latest is not set".to_string());
            }
            _ => {}
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"{
  "name": "foo",
  "versions": {
    "1.0.0": {
      "name": "foo",
      "version": "1.0.0",
      "main": "index.js",
      "_id": "foo@1.0.0",
      "readmeFilename": "README.md",
      "_nodeVersion": "20.11.0",
      "_npmVersion": "10.2.4",
      "dist": {
        "integrity": "sha512-abc",
        "shasum": "0123",
        "tarball": "http://localhost:4873/foo/-/foo-1.0.0.tgz"
      },
      "contributors": []
    }
  },
  "time": {
    "created": "2024-01-01T00:00:00.000Z",
    "modified": "2024-01-01T00:00:00.000Z",
    "1.0.0": "2024-01-01T00:00:00.000Z"
  },
  "users": {},
  "dist-tags": {
    "latest": "1.0.0"
  },
  "_uplinks": {},
  "_distfiles": {},
  "_attachments": {
    "foo-1.0.0.tgz": {
      "shasum": "0123",
      "version": "1.0.0"
    }
  },
  "_id": "foo",
  "readme": "# foo"
}
"##;

    #[test]
    fn parse_sample_manifest() {
        let manifest = PackageManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.name, "foo");
        assert_eq!(manifest.latest(), Some("1.0.0"));
        assert_eq!(manifest.time.created, "2024-01-01T00:00:00.000Z");
        assert_eq!(manifest.time.versions.len(), 1);
        let entry = &manifest.versions["1.0.0"];
        assert_eq!(entry.id(), Some("foo@1.0.0"));
        assert_eq!(entry.version(), Some("1.0.0"));
        let record = entry.record().unwrap();
        assert_eq!(record.metadata["main"], "index.js");
        assert!(!record.metadata.contains_key("_id"));
        assert_eq!(record.dist.shasum, "0123");
        assert_eq!(record.runtime_version.as_deref(), Some("20.11.0"));
        assert!(manifest.consistency_issues().is_empty());
    }

    #[test]
    fn written_form_is_stable() {
        let manifest = PackageManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.to_json_pretty().unwrap(), SAMPLE);
    }

    #[test]
    fn unknown_top_level_keys_survive() {
        let mut value: Value = serde_json::from_str(SAMPLE).unwrap();
        value["maintainers"] = serde_json::json!([{"name": "ops"}]);
        let manifest = PackageManifest::parse(&value.to_string()).unwrap();
        assert!(manifest.extra.contains_key("maintainers"));
        let out = manifest.to_json_pretty().unwrap();
        assert!(out.contains("\"maintainers\""));
    }

    #[test]
    fn reject_missing_required_keys() {
        for key in ["versions", "time", "_attachments"] {
            let mut value: Value = serde_json::from_str(SAMPLE).unwrap();
            value.as_object_mut().unwrap().remove(key);
            let err = PackageManifest::parse(&value.to_string()).unwrap_err();
            assert!(
                matches!(err, RegistryError::MalformedManifest { .. }),
                "missing {key} should be malformed"
            );
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn reject_wrong_types() {
        let mut value: Value = serde_json::from_str(SAMPLE).unwrap();
        value["versions"] = serde_json::json!([]);
        let err = PackageManifest::parse(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("wrong type"));
    }

    #[test]
    fn reject_time_without_created() {
        let mut value: Value = serde_json::from_str(SAMPLE).unwrap();
        value["time"].as_object_mut().unwrap().remove("created");
        let err = PackageManifest::parse(&value.to_string()).unwrap_err();
        assert!(matches!(err, RegistryError::MalformedManifest { .. }));
    }

    #[test]
    fn reject_invalid_json() {
        let err = PackageManifest::parse("{ nope").unwrap_err();
        assert!(matches!(err, RegistryError::MalformedManifest { .. }));
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.json");
        std::fs::write(&path, r#"{"name": "foo"}"#).unwrap();
        let err = PackageManifest::load(&path).unwrap_err();
        assert!(err.to_string().contains(&path.display().to_string()));
    }

    #[test]
    fn consistency_issues_detected() {
        let mut manifest = PackageManifest::parse(SAMPLE).unwrap();
        manifest.time.versions.clear();
        manifest.attachments.clear();
        manifest
            .dist_tags
            .insert(LATEST_TAG.to_string(), "9.9.9".to_string());

        let issues = manifest.consistency_issues();
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().any(|i| i.contains("no time entry")));
        assert!(issues.iter().any(|i| i.contains("no attachment")));
        assert!(issues.iter().any(|i| i.contains("9.9.9")));
    }

    #[test]
    fn misnamed_attachment_detected() {
        let mut manifest = PackageManifest::parse(SAMPLE).unwrap();
        let attachment = manifest.attachments.shift_remove("foo-1.0.0.tgz").unwrap();
        manifest
            .attachments
            .insert("foo-latest.tgz".to_string(), attachment);

        let issues = manifest.consistency_issues();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("foo-1.0.0.tgz"));
    }

    #[test]
    fn reject_non_object_version_entry() {
        let mut value: Value = serde_json::from_str(SAMPLE).unwrap();
        value["versions"]["1.0.0"] = serde_json::json!("1.0.0");
        let err = PackageManifest::parse(&value.to_string()).unwrap_err();
        assert!(matches!(err, RegistryError::MalformedManifest { .. }));
    }

    #[test]
    fn foreign_version_entry_keeps_key_order() {
        let record = serde_json::json!({
            "name": "foo",
            "version": "1.0.0",
            "_id": "foo@1.0.0",
            "dist": {
                "shasum": "0123",
                "tarball": "http://localhost:4873/foo/-/foo-1.0.0.tgz",
                "integrity": "sha512-abc"
            },
            "_npmUser": {"name": "ops"},
            "_hasShrinkwrap": false
        });
        let mut value: Value = serde_json::from_str(SAMPLE).unwrap();
        value["versions"]["1.0.0"] = record.clone();

        let manifest = PackageManifest::parse(&value.to_string()).unwrap();
        let out: Value = serde_json::from_str(&manifest.to_json_pretty().unwrap()).unwrap();
        assert_eq!(
            serde_json::to_string_pretty(&out["versions"]["1.0.0"]).unwrap(),
            serde_json::to_string_pretty(&record).unwrap()
        );
    }

    #[test]
    fn derived_record_field_order() {
        let record = VersionRecord {
            metadata: serde_json::json!({"name": "foo", "version": "1.0.0", "main": "index.js"})
                .as_object()
                .unwrap()
                .clone(),
            id: "foo@1.0.0".to_string(),
            readme_filename: Some("README.md".to_string()),
            runtime_version: Some("20.11.0".to_string()),
            builder_version: Some("10.2.4".to_string()),
            dist: Dist {
                integrity: Some("sha512-abc".to_string()),
                shasum: "0123".to_string(),
                tarball: "http://localhost:4873/foo/-/foo-1.0.0.tgz".to_string(),
                extra: Map::new(),
            },
            contributors: Some(Vec::new()),
        };
        let entry = VersionEntry::from(record.clone());
        let keys: Vec<&str> = entry.fields().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "name",
                "version",
                "main",
                "_id",
                "readmeFilename",
                "_nodeVersion",
                "_npmVersion",
                "dist",
                "contributors"
            ]
        );
        let dist_keys: Vec<&str> = entry.fields()["dist"]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(dist_keys, vec!["integrity", "shasum", "tarball"]);
        assert_eq!(entry.record().unwrap(), record);
    }
}
