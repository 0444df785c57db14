//! MergeGraph CLI - indexing and queries over the merged-model provenance graph.
//!
//! Every subcommand builds `Settings` from `MERGEGRAPH_*` environment variables
//! once, opens the stores and prints its result as JSON on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mergegraph::{
    CancellationToken, Exclude, IndexOptions, MergeGraphApi, ModelListRequest, Settings, SortBy,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mergegraph")]
#[command(about = "Provenance graph of merged language models")]
struct Args {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the hub and rebuild the graph
    Index {
        /// Maximum number of merged models fetched as the first wave
        #[arg(long)]
        limit: Option<usize>,

        /// Keep the current graph instead of starting empty
        #[arg(long)]
        keep_db: bool,

        /// In-process workers (0 = rely on separate `worker` processes)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Run workers against the shared job queue
    Worker {
        /// Exit once the queue is empty
        #[arg(long)]
        burst: bool,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Delete every node and relationship
    ResetDb,

    /// Write the graph to a JSON snapshot
    Export { path: PathBuf },

    /// Load a JSON snapshot into the graph
    Import { path: PathBuf },

    /// Rebuild the full-text index from the stored nodes
    RebuildTextIndex,

    /// Print the lineage sub-graph of a model
    Lineage {
        id: String,

        #[arg(long)]
        depth: Option<usize>,
    },

    /// List models
    Search {
        query: Option<String>,

        /// e.g. "most likes", "average score", "MMLU"
        #[arg(long, default_value = "default")]
        sort_by: String,

        /// private, gated, base-models or merged-models
        #[arg(long)]
        exclude: Option<String>,

        #[arg(long)]
        license: Option<String>,

        #[arg(long)]
        merge_method: Option<String>,

        #[arg(long)]
        architecture: Option<String>,

        /// Only models derived directly from this id
        #[arg(long)]
        base_model: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received, stopping workers");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let settings = Settings::from_env().context("Invalid MERGEGRAPH_* settings")?;
    info!("Graph store: {}", settings.db_path.display());
    let api = MergeGraphApi::open(settings)?;

    match args.command {
        Command::Index {
            limit,
            keep_db,
            workers,
        } => {
            let options = IndexOptions {
                limit,
                keep_db,
                seed: None,
            };
            let workers = workers.unwrap_or(api.settings().worker_count);
            tokio::select! {
                report = api.index(&options, workers) => print_json(&report?)?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Indexing interrupted; the graph is incomplete");
                }
            }
        }
        Command::Worker { burst, workers } => {
            let mut pool = api.worker_pool();
            if let Some(workers) = workers {
                pool = pool.with_workers(workers);
            }
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let stats = pool.run(burst, cancel).await?;
            print_json(&stats)?;
        }
        Command::ResetDb => {
            api.repository().delete_all()?;
            api.queue().clear()?;
            print_json(&json!({"reset": true}))?;
        }
        Command::Export { path } => {
            let snapshot = api.repository().export_to_path(&path)?;
            print_json(&json!({
                "path": path,
                "nodes_count": snapshot.nodes_count,
                "relationships_count": snapshot.relationships_count,
            }))?;
        }
        Command::Import { path } => {
            let stats = api.repository().import_from_path(&path)?;
            print_json(&stats)?;
        }
        Command::RebuildTextIndex => {
            api.repository().rebuild_text_index()?;
            print_json(&json!({"rebuilt": true}))?;
        }
        Command::Lineage { id, depth } => {
            let graph = api.service().get_model_lineage(&id, depth)?;
            print_json(&graph)?;
        }
        Command::Search {
            query,
            sort_by,
            exclude,
            license,
            merge_method,
            architecture,
            base_model,
            limit,
        } => {
            let request = ModelListRequest {
                query,
                sort_by: sort_by.parse::<SortBy>()?,
                exclude: exclude.map(|e| e.parse::<Exclude>()).transpose()?,
                license,
                merge_method,
                architecture,
                base_model,
                limit,
            };
            let models = api.service().list_models(&request)?;
            print_json(&models)?;
        }
    }

    Ok(())
}
