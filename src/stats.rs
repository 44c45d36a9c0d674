//! Database statistics.
//!
//! A quick summary of what's indexed: document and chunk counts, embedding
//! coverage per model, and the on-disk size. Used by `docvec stats`.

use anyhow::Result;

use crate::config::Config;
use crate::models::StoreStats;
use crate::vector_db::VectorDb;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let db = VectorDb::from_config(config).await?;
    let stats = db.get_statistics().await;
    db.store().close().await;
    print!("{}", render_stats(&stats?));
    Ok(())
}

fn render_stats(stats: &StoreStats) -> String {
    let mut out = String::new();
    out.push_str("docvec: Database Stats\n");
    out.push_str("======================\n\n");
    if let Some(ref path) = stats.database_path {
        out.push_str(&format!("  Database:    {}\n", path));
    }
    out.push_str(&format!(
        "  Size:        {}\n\n",
        format_bytes(stats.database_size_bytes)
    ));
    out.push_str(&format!("  Documents:   {}\n", stats.document_count));
    out.push_str(&format!("  Chunks:      {}\n", stats.chunk_count));

    if stats.embedding_counts.is_empty() {
        out.push_str("  Embedded:    none\n");
    } else {
        out.push_str("\n  By model:\n");
        out.push_str(&format!("  {:<32} {:>10} {:>6}\n", "MODEL", "EMBEDDED", "%"));
        out.push_str(&format!("  {}\n", "-".repeat(50)));
        for (model, count) in &stats.embedding_counts {
            out.push_str(&format!(
                "  {:<32} {:>10} {:>5}%\n",
                model,
                count,
                coverage_percent(*count, stats.chunk_count)
            ));
        }
    }
    out.push('\n');
    out
}

fn coverage_percent(embedded: i64, chunks: i64) -> i64 {
    if chunks > 0 {
        (embedded * 100) / chunks
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_render_lists_models() {
        let mut stats = StoreStats {
            document_count: 2,
            chunk_count: 4,
            ..StoreStats::default()
        };
        stats.embedding_counts.insert("mock".to_string(), 3);
        let out = render_stats(&stats);
        assert!(out.contains("Documents:   2"));
        assert!(out.contains("mock"));
        assert!(out.contains("75%"));
    }

    #[test]
    fn test_render_without_embeddings() {
        let out = render_stats(&StoreStats::default());
        assert!(out.contains("Embedded:    none"));
    }
}
