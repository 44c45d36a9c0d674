//! Filesystem discovery for `docvec sync` and `docvec add`.
//!
//! Walks a directory with `walkdir`, filters relative paths through the
//! `[sync]` include/exclude globs, and describes each file as a
//! [`FileItem`]. Documents are keyed by the file's absolute path, so the
//! same file maps to the same document no matter which directory a sync
//! was started from.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::SyncConfig;

/// Excluded on every walk, before the configured excludes.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// A discovered file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileItem {
    pub path: PathBuf,
    /// Document key: absolute path as a string.
    pub key: String,
    /// Path relative to the walked root, `/`-separated.
    pub relative_path: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_ms: i64,
    pub size_bytes: u64,
}

impl FileItem {
    /// Describe a single file; `root` is only used for `relative_path`.
    pub fn from_path(path: &Path, root: Option<&Path>) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if !meta.is_file() {
            bail!("Not a regular file: {}", path.display());
        }
        let relative = root
            .and_then(|r| path.strip_prefix(r).ok())
            .unwrap_or(path);

        Ok(Self {
            path: path.to_path_buf(),
            key: document_key(path),
            relative_path: relative.to_string_lossy().replace('\\', "/"),
            modified_ms: modified_millis(&meta),
            size_bytes: meta.len(),
        })
    }

    /// Document metadata stored alongside the chunks.
    pub fn metadata(&self) -> serde_json::Value {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_type = self
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        serde_json::json!({
            "filename": filename,
            "relative_path": self.relative_path,
            "file_type": file_type,
            "file_size_bytes": self.size_bytes,
        })
    }
}

/// Walk `root` and return matching files sorted by relative path.
pub fn scan_directory(root: &Path, sync: &SyncConfig) -> Result<Vec<FileItem>> {
    if !root.is_dir() {
        bail!("Sync root is not a directory: {}", root.display());
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;

    let include_set = build_globset(&sync.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(sync.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut items = Vec::new();
    let walker = WalkDir::new(&root).follow_links(sync.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = path
            .strip_prefix(&root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        items.push(FileItem::from_path(path, Some(&root))?);
    }

    items.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(items)
}

/// The key a file is stored under: canonical path when it exists,
/// otherwise the absolute form of `path`.
pub fn document_key(path: &Path) -> String {
    let resolved = path
        .canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf());
    resolved.to_string_lossy().to_string()
}

fn modified_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("docs/nested")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("docs/a.md"), "alpha").unwrap();
        std::fs::write(root.join("docs/nested/b.txt"), "beta").unwrap();
        std::fs::write(root.join("docs/image.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(root.join(".git/HEAD.md"), "ref").unwrap();
        std::fs::write(root.join("node_modules/pkg/readme.md"), "pkg").unwrap();
        tmp
    }

    #[test]
    fn test_scan_applies_globs_and_default_excludes() {
        let tmp = tree();
        let items = scan_directory(tmp.path(), &SyncConfig::default()).unwrap();
        let rels: Vec<&str> = items.iter().map(|i| i.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["docs/a.md", "docs/nested/b.txt"]);
    }

    #[test]
    fn test_scan_respects_exclude_globs() {
        let tmp = tree();
        let sync = SyncConfig {
            exclude_globs: vec!["**/nested/**".to_string()],
            ..SyncConfig::default()
        };
        let items = scan_directory(tmp.path(), &sync).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].relative_path, "docs/a.md");
    }

    #[test]
    fn test_metadata_fields() {
        let tmp = tree();
        let items = scan_directory(tmp.path(), &SyncConfig::default()).unwrap();
        let meta = items[0].metadata();
        assert_eq!(meta["filename"], "a.md");
        assert_eq!(meta["relative_path"], "docs/a.md");
        assert_eq!(meta["file_type"], "md");
        assert_eq!(meta["file_size_bytes"], 5);
        assert!(items[0].modified_ms > 0);
    }

    #[test]
    fn test_key_is_absolute() {
        let tmp = tree();
        let items = scan_directory(tmp.path(), &SyncConfig::default()).unwrap();
        assert!(Path::new(&items[0].key).is_absolute());
        assert_eq!(items[0].key, document_key(&tmp.path().join("docs/a.md")));
    }

    #[test]
    fn test_missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_directory(&tmp.path().join("nope"), &SyncConfig::default()).is_err());
    }
}
