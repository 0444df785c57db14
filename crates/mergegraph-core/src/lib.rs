//! MergeGraph Core - provenance graph for merged language models.
//!
//! Merged models on the Hugging Face Hub are built from other models. This
//! crate reads each model's tags, card metadata, merge configuration and README,
//! records which base models it was derived from, and stores the result as a
//! graph that can be walked to recover a model's full lineage.
//!
//! The CLI in `mergegraph-cli` drives indexing; everything is usable as a
//! library as well.
//!
//! # Example
//!
//! ```rust,ignore
//! use mergegraph::{IndexOptions, MergeGraphApi, Settings};
//!
//! #[tokio::main]
//! async fn main() -> mergegraph::Result<()> {
//!     let api = MergeGraphApi::open(Settings::from_env()?)?;
//!
//!     // Crawl the hub with four in-process workers
//!     let report = api.index(&IndexOptions::default(), 4).await?;
//!     println!("Indexed {} models", report.models_indexed);
//!
//!     // Walk one model's ancestry
//!     let lineage = api.service().get_model_lineage("teamX/merged-7b", None)?;
//!     println!("{} related models", lineage.nodes.len());
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod hub;
pub mod indexer;
pub mod jobs;
pub mod models;
pub mod network;
pub mod search;
pub mod service;

mod api;

pub use api::MergeGraphApi;
pub use cancel::CancellationToken;
pub use config::{AppConfig, GraphConfig, HubConfig, IndexingConfig, Settings};
pub use error::{MergeGraphError, Result};
pub use extraction::{reconcile, Extraction, ExtractionInput};
pub use graph::{
    GraphRepository, GraphSnapshot, GraphStore, ImportStats, ListModelsQuery, RepositoryOptions,
    TraversalFilter,
};
pub use hub::{HubModelInfo, HuggingFaceHub, ListModelsParams, ModelHub};
pub use indexer::{IndexOptions, IndexReport, Indexer};
pub use jobs::{JobPayload, JobQueue, JobStatus, WorkerPool, WorkerStats};
pub use models::{DerivedFrom, ExtractionMethod, Graph, GraphNode, GraphRelationship, ModelNode};
pub use service::{Exclude, ModelListRequest, ModelService, SortBy};
