//! Ingestion commands: `add`, `delete`, and directory `sync`.
//!
//! `sync` coordinates the batch flow:
//!
//! ```text
//! scan_directory ─▶ for each file: read ─▶ VectorDb::add_document ─▶ RunStats
//!                                                     │
//!                   prune: stored paths under root ◀──┘ whose file is gone
//! ```
//!
//! A failing file is logged and counted; the run continues with the next
//! one. Timestamps are file modification times in milliseconds.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use crate::config::{Config, SyncConfig};
use crate::connector_fs::{document_key, scan_directory, FileItem};
use crate::models::{AddOutcome, RunStats, UpdateMode};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::store::Store;
use crate::vector_db::VectorDb;

/// Per-run switches for [`sync_directory`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub update_mode: UpdateMode,
    pub prune_missing: bool,
    pub dry_run: bool,
}

impl From<&SyncConfig> for SyncOptions {
    fn from(sync: &SyncConfig) -> Self {
        Self {
            update_mode: sync.update_mode,
            prune_missing: sync.prune_missing,
            dry_run: false,
        }
    }
}

/// Ingest every matching file under `root` into `db`.
///
/// In dry-run mode nothing is written; the returned stats count what would
/// have been processed, skipped and pruned.
pub async fn sync_directory<S: Store>(
    db: &VectorDb<S>,
    root: &Path,
    sync: &SyncConfig,
    options: &SyncOptions,
    reporter: &dyn SyncProgressReporter,
) -> Result<RunStats> {
    let started = Instant::now();
    let root_label = root.display().to_string();
    let mut stats = RunStats::default();

    reporter.report(SyncProgressEvent::Discovering {
        root: root_label.clone(),
    });
    let items = scan_directory(root, sync)?;
    let total = items.len() as u64;
    tracing::info!(root = %root_label, files = total, "scanned directory");

    for (n, item) in items.iter().enumerate() {
        match ingest_file(db, item, options).await {
            Ok(outcome) => stats.record(&outcome),
            Err(e) => {
                tracing::warn!(path = %item.key, error = %e, "failed to ingest file");
                stats.record_error();
            }
        }
        reporter.report(SyncProgressEvent::Ingesting {
            root: root_label.clone(),
            n: n as u64 + 1,
            total,
        });
    }

    if options.prune_missing {
        let seen: HashSet<&str> = items.iter().map(|i| i.key.as_str()).collect();
        stats.pruned = prune_missing(db, root, &seen, options.dry_run).await?;
        reporter.report(SyncProgressEvent::Pruned {
            root: root_label,
            removed: stats.pruned,
        });
    }

    stats.elapsed = started.elapsed();
    Ok(stats)
}

async fn ingest_file<S: Store>(
    db: &VectorDb<S>,
    item: &FileItem,
    options: &SyncOptions,
) -> Result<AddOutcome> {
    let content = if item.size_bytes == 0 {
        String::new()
    } else {
        std::fs::read_to_string(&item.path)
            .with_context(|| format!("Failed to read {}", item.path.display()))?
    };
    // An emptied file still replaces its stored version; a new one is ignored.
    if content.trim().is_empty() && !db.store().document_exists(&item.key).await? {
        tracing::debug!(path = %item.key, "empty file, skipping");
        return Ok(AddOutcome::Skipped);
    }

    if options.dry_run {
        return dry_run_outcome(db, item, options.update_mode).await;
    }

    let outcome = db
        .add_document(
            &item.key,
            &content,
            item.modified_ms,
            item.metadata(),
            options.update_mode,
        )
        .await?;
    Ok(outcome)
}

/// What `add_document` would do, without chunking or writing.
async fn dry_run_outcome<S: Store>(
    db: &VectorDb<S>,
    item: &FileItem,
    mode: UpdateMode,
) -> Result<AddOutcome> {
    let stored = db.store().get_document_timestamp(&item.key).await?;
    let outcome = match (stored, mode) {
        (None, _) => AddOutcome::Added {
            document_id: 0,
            chunks: 0,
        },
        (Some(_), UpdateMode::Error) => {
            anyhow::bail!("document already exists: {}", item.key)
        }
        (Some(_), UpdateMode::Skip) => AddOutcome::Skipped,
        (Some(ts), UpdateMode::UpdateIfNewer) if item.modified_ms <= ts => AddOutcome::Skipped,
        (Some(_), _) => AddOutcome::Updated {
            document_id: 0,
            chunks: 0,
        },
    };
    Ok(outcome)
}

/// Delete stored documents under `root` that were not seen and whose file
/// no longer exists. Returns the number removed (or that would be).
async fn prune_missing<S: Store>(
    db: &VectorDb<S>,
    root: &Path,
    seen: &HashSet<&str>,
    dry_run: bool,
) -> Result<u64> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;
    let mut pruned = 0;
    for path in db.store().list_document_paths().await? {
        if seen.contains(path.as_str()) {
            continue;
        }
        let file = Path::new(&path);
        if !file.starts_with(&root) || file.exists() {
            continue;
        }
        if dry_run || db.delete_document(&path).await? {
            tracing::info!(path = %path, dry_run, "pruned missing document");
            pruned += 1;
        }
    }
    Ok(pruned)
}

fn print_summary(label: &str, stats: &RunStats) {
    println!("{}", label);
    println!("  processed: {}", stats.processed);
    println!("  skipped: {}", stats.skipped);
    println!("  errors: {}", stats.errors);
    println!("  chunks written: {}", stats.chunks_written);
    println!("  pruned: {}", stats.pruned);
    println!("  elapsed: {:.2}s", stats.elapsed.as_secs_f64());
}

/// `docvec sync <dir>`.
pub async fn run_sync(
    config: &Config,
    root: &Path,
    mode: Option<UpdateMode>,
    no_prune: bool,
    dry_run: bool,
    reporter: &dyn SyncProgressReporter,
) -> Result<()> {
    let db = VectorDb::from_config(config).await?;
    let mut options = SyncOptions::from(&config.sync);
    if let Some(mode) = mode {
        options.update_mode = mode;
    }
    options.prune_missing &= !no_prune;
    options.dry_run = dry_run;

    let stats = sync_directory(&db, root, &config.sync, &options, reporter).await;
    db.store().close().await;
    let stats = stats?;

    let label = if dry_run {
        format!("sync {} (dry-run)", root.display())
    } else {
        format!("sync {}", root.display())
    };
    print_summary(&label, &stats);
    if stats.errors > 0 {
        anyhow::bail!("{} file(s) failed to ingest", stats.errors);
    }
    println!("ok");
    Ok(())
}

/// `docvec add <file>`.
pub async fn run_add(
    config: &Config,
    file: &Path,
    mode: Option<UpdateMode>,
    path_key: Option<String>,
) -> Result<()> {
    let item = FileItem::from_path(file, file.parent())?;
    let key = path_key.unwrap_or_else(|| item.key.clone());
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mode = mode.unwrap_or(config.sync.update_mode);

    let db = VectorDb::from_config(config).await?;
    let result = db
        .add_document(&key, &content, item.modified_ms, item.metadata(), mode)
        .await;
    db.store().close().await;

    println!("add {}", key);
    match result? {
        AddOutcome::Added {
            document_id,
            chunks,
        } => println!("  added: document {} ({} chunks)", document_id, chunks),
        AddOutcome::Updated {
            document_id,
            chunks,
        } => println!("  updated: document {} ({} chunks)", document_id, chunks),
        AddOutcome::Skipped => println!("  skipped: stored version is current"),
    }
    println!("ok");
    Ok(())
}

/// `docvec delete <path>`. Deleting an unknown path is not an error.
pub async fn run_delete(config: &Config, path: &str) -> Result<()> {
    let db = VectorDb::from_config(config).await?;
    let key = resolve_key(db.store(), path).await?;
    let deleted = db.delete_document(&key).await;
    db.store().close().await;

    println!("delete {}", key);
    if deleted? {
        println!("  deleted");
    } else {
        println!("  not found (nothing to delete)");
    }
    println!("ok");
    Ok(())
}

/// Use `path` as given when it is a stored key, otherwise its absolute form.
pub(crate) async fn resolve_key<S: Store>(store: &S, path: &str) -> Result<String> {
    if store.document_exists(path).await? {
        return Ok(path.to_string());
    }
    Ok(document_key(Path::new(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SimpleChunker;
    use crate::progress::NoProgress;
    use crate::store::InMemoryStore;
    use crate::vector_db::VectorDbOptions;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn db() -> VectorDb<InMemoryStore> {
        VectorDb::new(
            InMemoryStore::new(),
            Box::new(SimpleChunker::new()),
            VectorDbOptions {
                max_chunk_size: 16,
                ..VectorDbOptions::default()
            },
        )
    }

    fn options() -> SyncOptions {
        SyncOptions::from(&SyncConfig::default())
    }

    #[tokio::test]
    async fn test_sync_ingests_and_skips_unchanged() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "alpha body").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "beta body").unwrap();
        std::fs::write(tmp.path().join("empty.md"), "").unwrap();
        let db = db();
        let sync = SyncConfig::default();

        let first = sync_directory(&db, tmp.path(), &sync, &options(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(first.processed, 2);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.errors, 0);

        let second = sync_directory(&db, tmp.path(), &sync, &options(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 3);
    }

    #[tokio::test]
    async fn test_sync_continues_past_bad_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("good.md"), "fine").unwrap();
        std::fs::write(tmp.path().join("bad.md"), [0xffu8, 0xfe, 0x00, 0x41]).unwrap();
        let db = db();

        let stats = sync_directory(&db, tmp.path(), &SyncConfig::default(), &options(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_sync_prunes_deleted_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("keep.md"), "keep").unwrap();
        std::fs::write(tmp.path().join("gone.md"), "gone").unwrap();
        let db = db();
        let sync = SyncConfig::default();
        sync_directory(&db, tmp.path(), &sync, &options(), &NoProgress)
            .await
            .unwrap();

        std::fs::remove_file(tmp.path().join("gone.md")).unwrap();
        let stats = sync_directory(&db, tmp.path(), &sync, &options(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(stats.pruned, 1);
        let paths = db.store().list_document_paths().await.unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("keep.md"));
    }

    #[tokio::test]
    async fn test_emptied_file_replaces_stored_chunks() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("notes.md");
        std::fs::write(&file, "secret old body").unwrap();
        let db = db();
        let sync = SyncConfig::default();
        sync_directory(&db, tmp.path(), &sync, &options(), &NoProgress)
            .await
            .unwrap();

        std::fs::write(&file, "").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        let stats = sync_directory(&db, tmp.path(), &sync, &options(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.pruned, 0);

        let key = document_key(&file);
        let doc = db.get_document(&key).await.unwrap().unwrap();
        assert!(doc.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        let db = db();
        let opts = SyncOptions {
            dry_run: true,
            ..options()
        };
        let stats = sync_directory(&db, tmp.path(), &SyncConfig::default(), &opts, &NoProgress)
            .await
            .unwrap();
        assert_eq!(stats.processed, 1);
        assert!(db.store().list_document_paths().await.unwrap().is_empty());
    }
}
