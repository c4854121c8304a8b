//! # docs-qa CLI (`dqa`)
//!
//! Keeps a vector index of a Markdown docs directory up to date and answers
//! questions against it.
//!
//! ## Usage
//!
//! ```bash
//! dqa --config ./dqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dqa index` | Detect changes and update the index |
//! | `dqa check` | Report what changed since the last pass, without indexing |
//! | `dqa search "<question>"` | Top-k chunks for a question |
//! | `dqa chunk <file>` | Show how a Markdown file is chunked |
//! | `dqa serve` | Index, then serve the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Build or refresh the index
//! dqa index --config ./dqa.toml
//!
//! # Rebuild from scratch, with JSON progress for scripts
//! dqa index --force --progress json --config ./dqa.toml
//!
//! # Ask the index directly
//! dqa search "how do I configure the proxy" --k 5 --config ./dqa.toml
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docs_qa::chat::ChatClient;
use docs_qa::config::{self, Config};
use docs_qa::embedding::create_provider;
use docs_qa::pipeline::{build_or_update_index, check_changes, open_index, ChangeCheck, PassReport};
use docs_qa::progress::ProgressMode;
use docs_qa::server::{run_server, AppState};
use docs_qa::sqlite_store::INDEX_FILE;
use docs_qa_core::chunk::build_chunks;
use docs_qa_core::models::{ChunkKind, SourceDocument};

/// docs-qa: incremental Markdown indexing and retrieval.
#[derive(Parser)]
#[command(name = "dqa", version, about = "Incremental Markdown indexing and retrieval")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./dqa.toml")]
    config: PathBuf,

    /// Log at info level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect changed documents and update the index.
    ///
    /// Does nothing when no document changed since the last successful pass.
    Index {
        /// Discard the existing index and rebuild everything.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Report added, removed, and modified documents without indexing.
    Check,

    /// Search the index.
    Search {
        question: String,

        /// Number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Show how a Markdown file would be chunked.
    Chunk {
        file: PathBuf,

        /// Print chunks as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run an indexing pass, then serve the HTTP API.
    Serve {
        /// Discard the existing index and rebuild everything first.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { force, progress } => {
            let mode = match progress.as_deref() {
                Some(s) => ProgressMode::parse(s)?,
                None => ProgressMode::default_for_tty(),
            };
            let provider = create_provider(&cfg.embedding)?;
            let reporter = mode.reporter();
            let (index, report) =
                build_or_update_index(&cfg, provider, force, reporter.as_ref()).await?;
            print_pass_report(&report);
            index.store().close().await;
        }
        Commands::Check => {
            let check = check_changes(&cfg)?;
            print_change_check(&check);
        }
        Commands::Search { question, k } => {
            run_search(&cfg, &question, k.unwrap_or(cfg.retrieval.top_k)).await?;
        }
        Commands::Chunk { file, json } => {
            run_chunk(&cfg, &file, json)?;
        }
        Commands::Serve { force } => {
            let provider = create_provider(&cfg.embedding)?;
            let reporter = ProgressMode::default_for_tty().reporter();
            let (index, report) =
                build_or_update_index(&cfg, provider, force, reporter.as_ref()).await?;
            print_pass_report(&report);

            let chat = ChatClient::from_config(&cfg.llm)?;
            if chat.is_none() {
                tracing::info!("llm disabled, /chat will return llm_disabled");
            }
            run_server(AppState::new(cfg, index, chat)).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_change_check(check: &ChangeCheck) {
    println!("Documents: {}", check.documents);
    if check.cold_start {
        println!("No checksum record found; a full pass is needed.");
    }
    println!("Changed: {}", check.changed);
    for (label, names) in [
        ("added", &check.added),
        ("removed", &check.removed),
        ("modified", &check.modified),
    ] {
        if !names.is_empty() {
            println!("  {} ({}):", label, names.len());
            for name in names {
                println!("    {}", name);
            }
        }
    }
}

fn print_pass_report(report: &PassReport) {
    match &report.index {
        None => println!(
            "Index up to date ({} documents unchanged).",
            report.changes.documents
        ),
        Some(index) => {
            println!("Index updated ({:?} pass):", index.mode);
            println!("  documents seen:      {}", index.documents_seen);
            println!("  documents reindexed: {}", index.documents_reindexed);
            println!("  documents unchanged: {}", index.documents_unchanged);
            println!("  documents pruned:    {}", index.documents_pruned);
            println!("  chunks written:      {}", index.chunks_written);
            println!("  embedding calls:     {}", index.embedding_calls);
        }
    }
}

async fn run_search(cfg: &Config, question: &str, k: usize) -> anyhow::Result<()> {
    if !cfg.index.path.join(INDEX_FILE).exists() {
        bail!(
            "No index found at {}. Run `dqa index` first.",
            cfg.index.path.display()
        );
    }
    let provider = create_provider(&cfg.embedding)?;
    let index = open_index(cfg, provider, false).await?;
    let hits = index.query(question, k).await?;

    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, hit.score, hit.chunk.citation());
        if let Some(header) = &hit.chunk.header {
            println!("   {}", header);
        }
        let preview: String = hit.chunk.text.trim().chars().take(240).collect();
        for line in preview.lines() {
            println!("   | {}", line);
        }
        println!();
    }

    index.store().close().await;
    Ok(())
}

fn run_chunk(cfg: &Config, file: &std::path::Path, json: bool) -> anyhow::Result<()> {
    let content =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file.to_string_lossy().replace('\\', "/");
    let document = SourceDocument::new(name, content, None);
    let chunks = build_chunks(&document, &cfg.chunking.settings())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    println!("{} chunks", chunks.len());
    for chunk in &chunks {
        let label = match chunk.kind {
            ChunkKind::Text => "text".to_string(),
            ChunkKind::Code => format!("code:{}", chunk.language.as_deref().unwrap_or("plain")),
        };
        println!(
            "#{} {} {} ({} chars)",
            chunk.ordinal,
            label,
            chunk.citation(),
            chunk.text.chars().count()
        );
    }
    Ok(())
}
