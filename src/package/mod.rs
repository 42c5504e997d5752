//! FHIR package cache: manifests, version selection, and the on-disk
//! layout under `$HOME/.fhir/packages`.
//!
//! A cached package lives at `<cache>/<name>#<version>/package/*.json`
//! with its `package.json` manifest alongside the resources. The cache
//! root is process-wide, overridable through `FHIR_CACHE_DIR`; everything
//! else in the library is instance-owned state.

pub mod loader;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

pub use loader::{CacheLoader, ResourceLoader};

/// Environment variable overriding the package cache root.
pub const CACHE_DIR_ENV: &str = "FHIR_CACHE_DIR";

/// The package cache root: `$FHIR_CACHE_DIR`, else `$HOME/.fhir/packages`.
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fhir")
        .join("packages")
}

/// A `<name>` or `<name>!<version>` package identifier. Omitted versions
/// mean `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageId {
    pub name: String,
    pub version: String,
}

impl PackageId {
    pub fn parse(id: &str) -> Self {
        match id.split_once('!') {
            Some((name, version)) if !version.is_empty() => Self {
                name: name.to_string(),
                version: version.to_string(),
            },
            _ => Self {
                name: id.trim_end_matches('!').to_string(),
                version: "latest".to_string(),
            },
        }
    }

    /// Cache directory name, `<name>#<version>`.
    pub fn dir_name(&self) -> String {
        format!("{}#{}", self.name, self.version)
    }
}

/// The `package.json` manifest of a cached package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    #[serde(default)]
    pub canonical: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fhir_versions: Vec<String>,
    /// Unknown manifest keys survive round-trips untouched.
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

/// Compare versions numerically when both look numeric, otherwise
/// lexicographically. Pre-release labels (`-ballot`) are ignored.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let base_a = a.split('-').next().unwrap_or(a);
    let base_b = b.split('-').next().unwrap_or(b);

    let numeric = |s: &str| s.chars().next().is_some_and(|c| c.is_ascii_digit());
    if numeric(base_a) && numeric(base_b) {
        let parts = |s: &str| -> Vec<u32> { s.split('.').filter_map(|p| p.parse().ok()).collect() };
        let (pa, pb) = (parts(base_a), parts(base_b));
        for i in 0..pa.len().max(pb.len()) {
            let (x, y) = (pa.get(i).copied().unwrap_or(0), pb.get(i).copied().unwrap_or(0));
            match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    } else {
        base_a.cmp(base_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn package_id_parses_both_forms() {
        let with_version = PackageId::parse("hl7.fhir.r4.core!4.0.1");
        assert_eq!(with_version.name, "hl7.fhir.r4.core");
        assert_eq!(with_version.version, "4.0.1");
        assert_eq!(with_version.dir_name(), "hl7.fhir.r4.core#4.0.1");

        let bare = PackageId::parse("hl7.fhir.us.core");
        assert_eq!(bare.version, "latest");
    }

    #[test]
    fn manifest_preserves_unknown_keys() {
        let manifest: PackageManifest = serde_json::from_value(json!({
            "name": "hl7.fhir.r4.core",
            "version": "4.0.1",
            "canonical": "http://hl7.org/fhir",
            "fhirVersions": ["4.0.1"],
            "dependencies": {"hl7.fhir.core": "4.0.1"},
            "tools-version": 3
        }))
        .unwrap();
        assert_eq!(manifest.fhir_versions, vec!["4.0.1"]);
        assert_eq!(manifest.dependencies.len(), 1);
        assert_eq!(manifest.extra.get("tools-version"), Some(&json!(3)));
    }

    #[test]
    fn version_comparison_is_numeric_when_possible() {
        assert_eq!(compare_versions("4.0.1", "4.0.2"), Ordering::Less);
        assert_eq!(compare_versions("4.10.0", "4.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("4.0.1", "4.0.1-ballot"), Ordering::Equal);
        assert_eq!(compare_versions("dev", "current"), Ordering::Greater);
    }

    #[test]
    fn cache_dir_reflects_environment() {
        let dir = cache_dir();
        match std::env::var(CACHE_DIR_ENV) {
            Ok(value) if !value.is_empty() => assert_eq!(dir, PathBuf::from(value)),
            _ => assert!(dir.ends_with(".fhir/packages")),
        }
    }
}
