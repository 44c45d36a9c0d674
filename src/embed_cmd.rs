//! `docvec embed missing`: backfill embeddings for the configured model.
//!
//! Chunks stored while the embedder was disabled (or under a different
//! model) have no vector for the current model; this command finds them and
//! embeds them in `batch_size` batches. Batches already written stay written
//! if a later batch fails.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::vector_db::VectorDb;

pub async fn run_embed_missing(config: &Config, limit: Option<usize>, dry_run: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let db = VectorDb::from_config(config).await?;
    let model = db
        .embedder()
        .map(|e| e.model_name().to_string())
        .unwrap_or_default();

    if dry_run {
        let pending = db.count_missing_embeddings(&model, limit).await;
        db.store().close().await;
        println!("embed missing (dry-run)");
        println!("  model: {}", model);
        println!("  chunks needing embeddings: {}", pending?);
        return Ok(());
    }

    let written = db.embed_missing(limit).await;
    db.store().close().await;

    println!("embed missing");
    println!("  model: {}", model);
    match written {
        Ok(0) => println!("  all chunks up to date"),
        Ok(n) => println!("  embedded: {}", n),
        Err(e) => bail!("embedding backfill failed: {}", e),
    }
    println!("ok");
    Ok(())
}
