//! Property graph storage and the repository over it.
//!
//! - [`GraphStore`]: embedded SQLite with retrying execution
//! - [`NodeQuery`]: escaped SQL construction
//! - [`GraphRepository`]: upserts, relationships, merges, listings and traversals
//! - [`GraphSnapshot`]: JSON export and import

mod fts;
mod query;
mod repository;
mod snapshot;
mod store;
mod traversal;

pub use fts::{TextIndexConfig, TextIndexManager};
pub use query::{
    build_fts5_query, escape_like, literal_list, property_key, quote_literal, NodeQuery,
    SortOrder,
};
pub use repository::{Filters, GraphRepository, ListModelsQuery, RepositoryOptions};
pub use snapshot::{GraphSnapshot, ImportStats};
pub use store::GraphStore;
pub use traversal::TraversalFilter;
