//! JSON export and import of the whole graph.
//!
//! Format:
//! ```json
//! {
//!   "directed": true,
//!   "multigraph": true,
//!   "nodes_count": 2,
//!   "relationships_count": 1,
//!   "nodes": [{"id": "A/x", "labels": ["Model", "MergedModel"], "likes": 3}],
//!   "relationships": [{"source": "A/x", "target": "B/y", "type": "DERIVED_FROM", "method": "tags"}]
//! }
//! ```

use super::query::{NodeQuery, RELATIONSHIP_COLUMNS};
use super::repository::GraphRepository;
use crate::config::GraphConfig;
use crate::error::{MergeGraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Serialized graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub directed: bool,
    pub multigraph: bool,
    pub nodes_count: usize,
    pub relationships_count: usize,
    pub nodes: Vec<Map<String, Value>>,
    pub relationships: Vec<Map<String, Value>>,
}

/// Counts from an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub nodes: usize,
    pub relationships: usize,
    /// Entries without an id or with a dangling endpoint.
    pub skipped: usize,
}

impl GraphSnapshot {
    /// Read a snapshot file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).map_err(|e| MergeGraphError::io_with_path(e, path))?;
        serde_json::from_str(&contents).map_err(|e| MergeGraphError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })
    }

    /// Write the snapshot through a temp file renamed into place.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| MergeGraphError::io_with_path(e, parent))?;

        let serialized = serde_json::to_string_pretty(self)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| MergeGraphError::io_with_path(e, parent))?;
        temp.write_all(serialized.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| MergeGraphError::io_with_path(e, temp.path()))?;
        temp.persist(path)
            .map_err(|e| MergeGraphError::io_with_path(e.error, path))?;
        Ok(())
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

impl GraphRepository {
    /// Serialize every node and relationship.
    pub fn export_snapshot(&self) -> Result<GraphSnapshot> {
        let nodes = self.store.query_nodes(&NodeQuery::new().build()?)?;
        let relationships = self.store.query_relationships(&format!(
            "SELECT {} FROM relationships r ORDER BY r.id",
            RELATIONSHIP_COLUMNS
        ))?;

        let nodes: Vec<Map<String, Value>> = nodes
            .into_iter()
            .map(|node| {
                let mut entry = Map::new();
                entry.insert("id".into(), Value::String(node.id));
                entry.insert(
                    "labels".into(),
                    Value::Array(node.labels.into_iter().map(Value::String).collect()),
                );
                entry.extend(node.properties);
                entry
            })
            .collect();
        let relationships: Vec<Map<String, Value>> = relationships
            .into_iter()
            .map(|rel| {
                let mut entry = Map::new();
                entry.insert("source".into(), Value::String(rel.source));
                entry.insert("target".into(), Value::String(rel.target));
                entry.insert("type".into(), Value::String(rel.rel_type));
                entry.extend(rel.properties);
                entry
            })
            .collect();

        Ok(GraphSnapshot {
            directed: true,
            multigraph: true,
            nodes_count: nodes.len(),
            relationships_count: relationships.len(),
            nodes,
            relationships,
        })
    }

    /// Load a snapshot into the store.
    ///
    /// Nodes are upserted; relationships are appended, so importing into a
    /// non-empty store can create parallel edges.
    pub fn import_snapshot(&self, snapshot: &GraphSnapshot) -> Result<ImportStats> {
        let mut stats = ImportStats::default();

        for entry in &snapshot.nodes {
            let mut props = entry.clone();
            let Some(id) = take_string(&mut props, "id") else {
                stats.skipped += 1;
                continue;
            };
            let labels: Vec<String> = match props.remove("labels") {
                Some(Value::Array(items)) => items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => vec![GraphConfig::MODEL_LABEL.to_string()],
            };
            props.retain(|_, v| !v.is_null());
            self.create_or_update(&id, &props, &labels)?;
            stats.nodes += 1;
        }

        for entry in &snapshot.relationships {
            let mut props = entry.clone();
            let (Some(source), Some(target)) =
                (take_string(&mut props, "source"), take_string(&mut props, "target"))
            else {
                stats.skipped += 1;
                continue;
            };
            let rel_type = take_string(&mut props, "type")
                .unwrap_or_else(|| GraphConfig::DERIVED_FROM.to_string());
            props.remove("id");
            props.retain(|_, v| !v.is_null());
            match self.create_relationship(&source, &target, &rel_type, &props)? {
                Some(_) => stats.relationships += 1,
                None => stats.skipped += 1,
            }
        }

        if stats.skipped > 0 {
            warn!("Skipped {} snapshot entries", stats.skipped);
        }
        info!(
            "Imported {} nodes and {} relationships",
            stats.nodes, stats.relationships
        );
        Ok(stats)
    }

    pub fn export_to_path(&self, path: &Path) -> Result<GraphSnapshot> {
        let snapshot = self.export_snapshot()?;
        snapshot.write_to(path)?;
        info!(
            "Exported {} nodes and {} relationships to {}",
            snapshot.nodes_count,
            snapshot.relationships_count,
            path.display()
        );
        Ok(snapshot)
    }

    pub fn import_from_path(&self, path: &Path) -> Result<ImportStats> {
        self.import_snapshot(&GraphSnapshot::read_from(path)?)
    }
}
