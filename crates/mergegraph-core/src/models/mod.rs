//! Graph entities: model nodes, derivation edges and untyped graph values.

mod graph;
mod model;
mod relationship;

pub use graph::{Graph, GraphNode, GraphRelationship};
pub use model::{MergeMethod, ModelNode};
pub use relationship::{DerivedFrom, ExtractionMethod};
