//! The resource loader seam: resolving a package id to a directory of
//! JSON definitions.
//!
//! Acquisition (registry downloads, mirrors) lives outside this crate.
//! The default [`CacheLoader`] only reads the local cache; plugging a
//! downloading loader into the facade is a one-trait affair.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::{LoaderError, LoaderResult};

use super::{PackageId, compare_versions};

/// Resolves a package id to the directory holding its `package/` tree.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Fetch or reuse the package, returning the `package/` directory
    /// containing `package.json` and the definition files.
    async fn resolve(&self, id: &PackageId) -> LoaderResult<PathBuf>;
}

/// Cache-only loader over the standard on-disk layout.
#[derive(Debug, Clone)]
pub struct CacheLoader {
    root: PathBuf,
}

impl CacheLoader {
    /// Loader over the default cache root (see [`super::cache_dir`]).
    pub fn new() -> Self {
        Self {
            root: super::cache_dir(),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `latest` resolves to the greatest cached version directory
    /// matching the name.
    async fn resolve_latest(&self, name: &str) -> LoaderResult<String> {
        let prefix = format!("{name}#");
        let mut best: Option<String> = None;

        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            // No cache directory at all: nothing is cached.
            return Err(LoaderError::PackageNotFound {
                name: name.to_string(),
                version: "latest".to_string(),
            });
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let file_name = entry.file_name();
            let Some(dir_name) = file_name.to_str() else {
                continue;
            };
            let Some(version) = dir_name.strip_prefix(&prefix) else {
                continue;
            };
            match &best {
                Some(current) if compare_versions(version, current) != std::cmp::Ordering::Greater => {}
                _ => best = Some(version.to_string()),
            }
        }

        best.ok_or_else(|| LoaderError::PackageNotFound {
            name: name.to_string(),
            version: "latest".to_string(),
        })
    }
}

impl Default for CacheLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLoader for CacheLoader {
    async fn resolve(&self, id: &PackageId) -> LoaderResult<PathBuf> {
        let version = if id.version == "latest" {
            self.resolve_latest(&id.name).await?
        } else {
            id.version.clone()
        };

        let resolved = PackageId {
            name: id.name.clone(),
            version,
        };
        let package_dir = self.root.join(resolved.dir_name()).join("package");
        let manifest = package_dir.join("package.json");

        if !fs::try_exists(&manifest).await.unwrap_or(false) {
            return Err(LoaderError::PackageNotFound {
                name: resolved.name,
                version: resolved.version,
            });
        }

        debug!(package = %resolved.dir_name(), dir = %package_dir.display(), "resolved cached package");
        Ok(package_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seed_package(root: &Path, name: &str, version: &str) {
        let dir = root.join(format!("{name}#{version}")).join("package");
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(
            dir.join("package.json"),
            serde_json::to_vec(&json!({"name": name, "version": version})).unwrap(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn resolves_exact_version() {
        let tmp = tempfile::tempdir().unwrap();
        seed_package(tmp.path(), "test.pkg", "1.0.0").await;

        let loader = CacheLoader::with_root(tmp.path());
        let dir = loader
            .resolve(&PackageId::parse("test.pkg!1.0.0"))
            .await
            .unwrap();
        assert!(dir.ends_with("test.pkg#1.0.0/package"));
    }

    #[tokio::test]
    async fn latest_picks_greatest_cached_version() {
        let tmp = tempfile::tempdir().unwrap();
        seed_package(tmp.path(), "test.pkg", "1.0.0").await;
        seed_package(tmp.path(), "test.pkg", "1.10.0").await;
        seed_package(tmp.path(), "test.pkg", "1.2.0").await;
        seed_package(tmp.path(), "other.pkg", "9.9.9").await;

        let loader = CacheLoader::with_root(tmp.path());
        let dir = loader.resolve(&PackageId::parse("test.pkg")).await.unwrap();
        assert!(dir.ends_with("test.pkg#1.10.0/package"));
    }

    #[tokio::test]
    async fn missing_package_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = CacheLoader::with_root(tmp.path());
        let error = loader
            .resolve(&PackageId::parse("absent.pkg!1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(error, LoaderError::PackageNotFound { .. }));
    }
}
