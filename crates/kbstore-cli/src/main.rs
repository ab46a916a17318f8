//! CLI for building, inspecting, querying and watching kbstore vector stores.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use kbstore_core::watcher::DEFAULT_DEBOUNCE;
use kbstore_core::{
    app_data_dir, default_settings_path, load_default_settings, load_settings, save_settings,
    save_settings_to, watch_sources, Manifest, OllamaEmbedder, ScoredChunk, Settings,
    VectorStore, VectorStoreManager,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kbstore")]
#[command(about = "kbstore: persisted vector stores over folders of documents")]
struct Cli {
    /// Settings file (TOML). Defaults to config.toml in the app data directory.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Verbose logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Commands,
}

/// Flags that override the settings file.
#[derive(clap::Args)]
struct Overrides {
    /// Folder holding one knowledge folder per store (`<docs-root>/<db-name>`).
    #[arg(long, global = true, value_name = "PATH")]
    docs_root: Option<PathBuf>,
    /// Where stores are persisted.
    #[arg(long, global = true, value_name = "PATH")]
    db_path: Option<PathBuf>,
    /// Maximum characters per chunk.
    #[arg(long, global = true)]
    chunk_size: Option<usize>,
    /// Characters shared between adjacent chunks.
    #[arg(long, global = true)]
    chunk_overlap: Option<usize>,
    /// Number of chunks a query returns.
    #[arg(short, global = true)]
    k: Option<usize>,
    /// Ollama base URL.
    #[arg(long, global = true, value_name = "URL")]
    ollama_url: Option<String>,
    /// Embedding model served by Ollama.
    #[arg(long, global = true)]
    model: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Create each store if missing, or load it; with --force, rebuild it from its documents.
    Build {
        #[arg(value_name = "DB_NAME", required = true)]
        db_names: Vec<String>,
        /// Rebuild even if a persisted store exists.
        #[arg(long)]
        force: bool,
    },
    /// Retrieve the chunks most similar to a query.
    Query {
        #[arg(value_name = "DB_NAME")]
        db_name: String,
        #[arg(value_name = "QUERY")]
        query: String,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show what a persisted store contains.
    Info {
        #[arg(value_name = "DB_NAME")]
        db_name: String,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Build the store, then rebuild it whenever its documents change.
    Watch {
        #[arg(value_name = "DB_NAME")]
        db_name: String,
    },
    /// Write the current settings, flags included, to the settings file.
    Init {
        /// Replace an existing settings file.
        #[arg(long)]
        force: bool,
    },
    /// Show where kbstore keeps its settings and default stores.
    DataDir,
}

#[derive(Serialize)]
struct StoreInfo<'a> {
    db_name: &'a str,
    path: &'a Path,
    #[serde(flatten)]
    manifest: &'a Manifest,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "kbstore=debug,kbstore_core=debug"
    } else {
        "kbstore=info,kbstore_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = settings(&cli)?;
    match cli.command {
        Commands::Build { db_names, force } => {
            for db_name in &db_names {
                println!("Initializing vector store for '{db_name}'...");
                let mut manager = manager(&settings, db_name)?;
                let store = manager
                    .update_vectorstore(force)
                    .with_context(|| format!("store '{db_name}'"))?;
                let entries = store.len();
                match manager.last_build() {
                    Some(report) => {
                        println!(
                            "  built from {} document(s): {} chunk(s)",
                            report.documents, report.chunks
                        );
                        for skipped in &report.skipped {
                            println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
                        }
                    }
                    None => println!("  loaded existing store: {entries} chunk(s)"),
                }
                println!("  {}", manager.index_path().display());
            }
        }
        Commands::Query { db_name, query, json } => {
            let mut manager = manager(&settings, &db_name)?;
            let retriever = manager.load_retriever(None)?;
            let hits = retriever.retrieve(&query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                print_hits(&hits);
            }
        }
        Commands::Info { db_name, json } => {
            let config = settings.store_config(&db_name);
            let path = config.index_path();
            let store = VectorStore::load(&path)
                .with_context(|| format!("no usable store '{db_name}' at {}", path.display()))?;
            let info = StoreInfo {
                db_name: &db_name,
                path: &path,
                manifest: store.manifest(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                let m = info.manifest;
                println!("{} ({})", info.db_name, info.path.display());
                println!("  entries:    {}", m.entry_count);
                println!("  model:      {} ({} dimensions)", m.embedding_model, m.dimension);
                println!("  chunking:   {} chars, {} overlap", m.chunk_size, m.chunk_overlap);
                println!("  built at:   {}", m.built_at);
            }
        }
        Commands::Watch { db_name } => {
            let mut manager = manager(&settings, &db_name)?;
            manager.update_vectorstore(false)?;
            let root = manager.config().knowledge_path().to_path_buf();
            watch_sources(&root, DEFAULT_DEBOUNCE, |paths| {
                tracing::info!(changed = paths.len(), "sources changed, rebuilding");
                match manager.update_vectorstore(true) {
                    Ok(store) => tracing::info!(entries = store.len(), "store rebuilt"),
                    Err(e) => tracing::error!(error = %e, "rebuild failed, keeping previous store"),
                }
                ControlFlow::Continue(())
            })?;
        }
        Commands::Init { force } => {
            let target = match &cli.config {
                Some(path) => path.clone(),
                None => default_settings_path().context("could not determine app data directory")?,
            };
            if target.exists() && !force {
                anyhow::bail!("{} already exists (use --force to replace it)", target.display());
            }
            let written = match &cli.config {
                Some(path) => {
                    save_settings_to(path, &settings)?;
                    path.clone()
                }
                None => save_settings(&settings)?,
            };
            println!("Wrote {}", written.display());
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
    }
    Ok(())
}

/// Settings file (explicit or default) with command-line overrides applied.
fn settings(cli: &Cli) -> Result<Settings> {
    // `init` may be creating the explicit settings file.
    let mut settings = match &cli.config {
        Some(path) if path.is_file() || !matches!(cli.command, Commands::Init { .. }) => {
            load_settings(path)?
        }
        Some(_) => Settings::default(),
        None => load_default_settings()?,
    };
    let o = &cli.overrides;
    if let Some(p) = &o.docs_root {
        settings.docs_root = Some(p.clone());
    }
    if let Some(p) = &o.db_path {
        settings.db_path = Some(p.clone());
    }
    if let Some(n) = o.chunk_size {
        settings.chunk_size = Some(n);
    }
    if let Some(n) = o.chunk_overlap {
        settings.chunk_overlap = Some(n);
    }
    if let Some(k) = o.k {
        settings.k = Some(k);
    }
    if let Some(url) = &o.ollama_url {
        settings.ollama.url = url.clone();
    }
    if let Some(model) = &o.model {
        settings.ollama.model = model.clone();
    }
    Ok(settings)
}

fn manager(settings: &Settings, db_name: &str) -> Result<VectorStoreManager<OllamaEmbedder>> {
    let embedder = OllamaEmbedder::from_url(&settings.ollama.url)?
        .with_embed_model(settings.ollama.model.clone())
        .with_batch_size(settings.ollama.batch_size);
    let manager = VectorStoreManager::new(settings.store_config(db_name), embedder)?;
    Ok(manager)
}

fn print_hits(hits: &[ScoredChunk]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in hits.iter().enumerate() {
        let first = hit.chunk.text.lines().next().unwrap_or("").trim();
        let preview = if first.chars().count() > 80 {
            format!("{}...", first.chars().take(80).collect::<String>())
        } else {
            first.to_string()
        };
        println!(
            "{}. [{:.3}] {} #{}",
            i + 1,
            hit.score,
            hit.chunk.source.display(),
            hit.chunk.index
        );
        println!("   {preview}");
    }
}
