//! Collection collaborator: produces local artifact files to import.
//!
//! The pipeline only needs [`Collector::download_artifacts`]; how artifacts
//! get onto disk (feed scraping, a cron'd downloader, manual drops) is the
//! collector's business. The built-in [`DirectoryCollector`] picks up image
//! files from a watched directory.

use anyhow::{bail, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::config::CollectorConfig;

/// A source of artifact files.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use std::path::PathBuf;
/// use schedule_harvester::collect::Collector;
///
/// struct FixedCollector(Vec<PathBuf>);
///
/// #[async_trait]
/// impl Collector for FixedCollector {
///     fn name(&self) -> &str { "fixed" }
///     async fn download_artifacts(&self) -> Result<Vec<PathBuf>> {
///         Ok(self.0.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait Collector: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Fetch new artifacts and return their local paths.
    ///
    /// Returning a path that was already imported is fine; deduplication
    /// happens downstream by content fingerprint.
    async fn download_artifacts(&self) -> Result<Vec<PathBuf>>;
}

/// Collects image files below a root directory.
pub struct DirectoryCollector {
    config: CollectorConfig,
}

impl DirectoryCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    fn scan(&self) -> Result<Vec<PathBuf>> {
        let root = &self.config.root;
        if !root.exists() {
            bail!("Collector root does not exist: {}", root.display());
        }

        let include_set = build_globset(&self.config.include_globs)?;

        let mut default_excludes = vec!["**/.*/**".to_string(), "**/.*".to_string()];
        default_excludes.extend(self.config.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let mut paths = Vec::new();

        let walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_lowercase();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }

            paths.push(path.to_path_buf());
        }

        // Sort for deterministic ordering
        paths.sort();

        Ok(paths)
    }
}

#[async_trait]
impl Collector for DirectoryCollector {
    fn name(&self) -> &str {
        "directory"
    }

    async fn download_artifacts(&self) -> Result<Vec<PathBuf>> {
        let paths = self.scan()?;
        tracing::debug!(
            root = %self.config.root.display(),
            found = paths.len(),
            "directory scan finished"
        );
        Ok(paths)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn collector_for(root: &std::path::Path) -> DirectoryCollector {
        DirectoryCollector::new(CollectorConfig {
            root: root.to_path_buf(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn picks_up_images_only() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.jpg"), b"b").unwrap();
        fs::write(tmp.path().join("a.PNG"), b"a").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"n").unwrap();
        fs::create_dir_all(tmp.path().join("2025/03")).unwrap();
        fs::write(tmp.path().join("2025/03/c.jpeg"), b"c").unwrap();

        let paths = collector_for(tmp.path()).download_artifacts().await.unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names.len(), 3);
        assert!(names.contains(&"a.PNG".to_string()));
        assert!(names.contains(&"b.jpg".to_string()));
        assert!(names.contains(&"c.jpeg".to_string()));
    }

    #[tokio::test]
    async fn hidden_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".partial.jpg"), b"x").unwrap();
        fs::create_dir_all(tmp.path().join(".cache")).unwrap();
        fs::write(tmp.path().join(".cache/y.jpg"), b"y").unwrap();

        let paths = collector_for(tmp.path()).download_artifacts().await.unwrap();
        assert!(paths.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = collector_for(&tmp.path().join("nope"))
            .download_artifacts()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
