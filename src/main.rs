//! # docvec CLI
//!
//! The `docvec` binary indexes text files into a local vector store and
//! searches them.
//!
//! ## Usage
//!
//! ```bash
//! docvec --config ./config/docvec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docvec init` | Create the SQLite database and run schema migrations |
//! | `docvec add <file>` | Add or update a single file |
//! | `docvec delete <path>` | Remove a document (no-op if absent) |
//! | `docvec sync <dir>` | Ingest every matching file under a directory |
//! | `docvec search "<query>"` | Rank stored chunks, optionally filtered by path or metadata |
//! | `docvec show <path>` | Print a stored document and its chunks |
//! | `docvec chunk <file>` | Preview chunk spans as JSON |
//! | `docvec embed missing` | Backfill embeddings for the configured model |
//! | `docvec stats` | Counts and database size |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docvec::models::UpdateMode;
use docvec::progress::ProgressMode;
use docvec::search::{SearchDisplay, SearchFilter};
use docvec::store::SqliteStore;
use docvec::{chunk_cmd, config, embed_cmd, ingest, search, show, stats};

/// docvec: a local vector document store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "docvec",
    about = "docvec: chunk, embed, store, and search local documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docvec.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and its tables (documents, chunks,
    /// embeddings). Running it multiple times is safe.
    Init,

    /// Add a single file.
    ///
    /// The file's modification time is its timestamp, compared against the
    /// stored one under `update_if_newer`.
    Add {
        file: PathBuf,

        /// Update policy when the path already exists:
        /// `error`, `skip`, `update_if_newer`, or `force`.
        #[arg(long)]
        mode: Option<UpdateMode>,

        /// Store under this key instead of the file's absolute path.
        #[arg(long)]
        path_key: Option<String>,
    },

    /// Delete a document and its chunks and embeddings.
    Delete {
        /// Stored path (or a file path, resolved to its absolute form).
        path: String,
    },

    /// Ingest every matching file under a directory.
    ///
    /// Files are matched against `[sync]` include/exclude globs. Documents
    /// under the directory whose file no longer exists are pruned unless
    /// `--no-prune` is given.
    Sync {
        dir: PathBuf,

        /// Update policy override for this run.
        #[arg(long)]
        mode: Option<UpdateMode>,

        /// Keep documents whose file has been removed.
        #[arg(long)]
        no_prune: bool,

        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: `off`, `human`, or `json`
        /// (default: human when stderr is a terminal).
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search stored chunks.
    ///
    /// Requires an embedding provider to be configured.
    Search {
        query: String,

        /// Similarity metric: `cosine`, `euclidean`, or `dot`.
        #[arg(long)]
        metric: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Rank embeddings stored under this model name.
        #[arg(long)]
        model: Option<String>,

        /// Only documents whose path starts with this (an existing path is
        /// matched in its absolute form).
        #[arg(long)]
        path_prefix: Option<String>,

        /// Only documents with this metadata value, as `key=value`.
        /// Repeatable; every condition must match.
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        /// Print each hit's document metadata.
        #[arg(long)]
        show_metadata: bool,

        /// Excerpt length in characters.
        #[arg(long, default_value_t = 160)]
        max_content_length: usize,
    },

    /// Print a stored document and its chunks.
    Show {
        path: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Preview how a file would be chunked, without writing anything.
    Chunk {
        file: PathBuf,

        #[arg(long)]
        max_chunk_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show document, chunk, and embedding counts.
    Stats,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that have no vector for the configured model.
    Missing {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Show the count without embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

/// `RUST_LOG` wins; otherwise `-v`/`-q` pick the level. Logs go to stderr.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::open(&cfg.db.path).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Add {
            file,
            mode,
            path_key,
        } => {
            ingest::run_add(&cfg, &file, mode, path_key).await?;
        }
        Commands::Delete { path } => {
            ingest::run_delete(&cfg, &path).await?;
        }
        Commands::Sync {
            dir,
            mode,
            no_prune,
            dry_run,
            progress,
        } => {
            let reporter = ProgressMode::from_flag(progress.as_deref())?.reporter();
            ingest::run_sync(&cfg, &dir, mode, no_prune, dry_run, reporter.as_ref()).await?;
        }
        Commands::Search {
            query,
            metric,
            limit,
            model,
            path_prefix,
            meta,
            show_metadata,
            max_content_length,
        } => {
            let filter = SearchFilter {
                path_prefix: path_prefix.as_deref().map(search::resolve_path_prefix),
                metadata: meta
                    .iter()
                    .map(|m| search::parse_meta_pair(m))
                    .collect::<anyhow::Result<_>>()?,
            };
            let display = SearchDisplay {
                show_metadata,
                max_content_length,
            };
            search::run_search(
                &cfg,
                &query,
                metric.as_deref(),
                limit,
                model.as_deref(),
                &filter,
                &display,
            )
            .await?;
        }
        Commands::Show { path, json } => {
            show::run_show(&cfg, &path, json).await?;
        }
        Commands::Chunk {
            file,
            max_chunk_size,
            overlap,
        } => {
            chunk_cmd::run_chunk(&cfg, &file, max_chunk_size, overlap).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Missing { limit, dry_run } => {
                embed_cmd::run_embed_missing(&cfg, limit, dry_run).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
