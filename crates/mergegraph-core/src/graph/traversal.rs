//! Neighborhood and ancestry traversals.

use super::query::{label_condition, quote_literal, rel_type_condition, RELATIONSHIP_COLUMNS};
use super::repository::{id_literals, GraphRepository};
use super::store::query_relationships;
use crate::error::Result;
use crate::models::Graph;
use rusqlite::Connection;
use std::collections::BTreeSet;
use tracing::debug;

/// Restrictions shared by both traversals.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraversalFilter<'a> {
    /// Only step onto nodes with this label.
    pub label: Option<&'a str>,
    /// Only follow edges of this type.
    pub rel_type: Option<&'a str>,
    /// Hop limit; `None` walks until exhaustion.
    pub max_depth: Option<usize>,
}

impl TraversalFilter<'_> {
    /// Extra `AND` conditions on the stepped edge `r` and node `n`.
    fn step_conditions(&self) -> Result<String> {
        let mut conditions = String::new();
        if let Some(rel_type) = self.rel_type {
            conditions.push_str(&format!(" AND {}", rel_type_condition("r", rel_type)?));
        }
        if let Some(label) = self.label {
            conditions.push_str(&format!(" AND {}", label_condition(label)?));
        }
        Ok(conditions)
    }
}

const NEIGHBOR: &str = "CASE WHEN r.source = cur.id THEN r.target ELSE r.source END";

/// Join condition and neighbor expression for one step from `cur` over `r`.
fn step(directed: bool) -> (&'static str, &'static str) {
    if directed {
        ("r.source = cur.id", "r.target")
    } else {
        ("r.source = cur.id OR r.target = cur.id", NEIGHBOR)
    }
}

/// `visited(id, depth)`: every node reachable from `start` with its hop
/// distance. Rows are deduplicated on `(id, depth)`, so each node is expanded
/// at most once per depth and dense graphs stay polynomial.
///
/// Without a hop limit every depth is recorded as 0.
fn visited_cte(start: &str, directed: bool, filter: &TraversalFilter<'_>) -> Result<String> {
    let start = quote_literal(start)?;
    let conditions = filter.step_conditions()?;
    let (join, neighbor) = step(directed);
    let (next_depth, bound) = match filter.max_depth {
        Some(max_depth) => ("cur.depth + 1", format!(" AND cur.depth < {}", max_depth)),
        None => ("0", String::new()),
    };

    Ok(format!(
        "WITH RECURSIVE reach(id, depth) AS (
            SELECT n.id, 0 FROM nodes n WHERE n.id = {start}
            UNION
            SELECT n.id, {next_depth}
            FROM reach cur
            JOIN relationships r ON {join}
            JOIN nodes n ON n.id = {neighbor}
            WHERE 1{bound}{conditions}
        ),
        visited(id, depth) AS (SELECT id, MIN(depth) FROM reach GROUP BY id)",
    ))
}

/// Ids reachable from `start` ignoring edge direction.
pub(crate) fn reachable_ids_sql(start: &str, filter: &TraversalFilter<'_>) -> Result<String> {
    Ok(format!(
        "{} SELECT id FROM visited ORDER BY id",
        visited_cte(start, false, filter)?
    ))
}

/// Visited nodes (with a `NULL` edge) followed by every `(neighbor, edge)`
/// stepped over from a node inside the hop limit.
pub(crate) fn walk_sql(start: &str, directed: bool, filter: &TraversalFilter<'_>) -> Result<String> {
    let (join, neighbor) = step(directed);
    let mut conditions = filter.step_conditions()?;
    if let Some(max_depth) = filter.max_depth {
        conditions.push_str(&format!(" AND cur.depth < {}", max_depth));
    }

    Ok(format!(
        "{cte}
        SELECT id, NULL FROM visited
        UNION ALL
        SELECT n.id, r.id
        FROM visited cur
        JOIN relationships r ON {join}
        JOIN nodes n ON n.id = {neighbor}
        WHERE 1{conditions}",
        cte = visited_cte(start, directed, filter)?,
    ))
}

fn collect_ids(conn: &Connection, sql: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(ids)
}

impl GraphRepository {
    /// Neighborhood of `start_id`: every node reachable within the hop limit
    /// ignoring direction, plus every edge with both endpoints in that set.
    ///
    /// The result is empty when `start_id` is empty or unknown.
    pub fn get_sub_graph(&self, start_id: &str, filter: &TraversalFilter<'_>) -> Result<Graph> {
        if start_id.is_empty() {
            return Ok(Graph::default());
        }
        let sql = reachable_ids_sql(start_id, filter)?;

        let graph = self.store.with_connection(|conn| {
            let ids = collect_ids(conn, &sql)?;
            if ids.is_empty() {
                return Ok(Graph::default());
            }
            let nodes = Self::nodes_by_ids(conn, &ids)?;
            let list = id_literals(&ids)?;
            let mut edge_sql = format!(
                "SELECT {} FROM relationships r WHERE r.source IN ({}) AND r.target IN ({})",
                RELATIONSHIP_COLUMNS, list, list
            );
            if let Some(rel_type) = filter.rel_type {
                edge_sql.push_str(&format!(" AND {}", rel_type_condition("r", rel_type)?));
            }
            edge_sql.push_str(" ORDER BY r.id");
            let relationships = query_relationships(conn, &edge_sql)?;
            Ok(Graph {
                nodes,
                relationships,
            })
        })?;

        debug!(
            "Sub-graph of {}: {} nodes, {} relationships",
            start_id,
            graph.nodes.len(),
            graph.relationships.len()
        );
        Ok(graph)
    }

    /// Walk from `start_id` returning only the edges stepped over.
    ///
    /// Edges between two nodes at the hop limit are not walked. With
    /// `directed`, edges are followed from source to target only, which
    /// yields the ancestry of a model.
    pub fn get_sub_tree(
        &self,
        start_id: &str,
        directed: bool,
        filter: &TraversalFilter<'_>,
    ) -> Result<Graph> {
        if start_id.is_empty() {
            return Ok(Graph::default());
        }
        let sql = walk_sql(start_id, directed, filter)?;

        self.store.with_connection(|conn| {
            let mut ids = BTreeSet::new();
            let mut edges = BTreeSet::new();
            {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    ids.insert(row.get::<_, String>(0)?);
                    if let Some(edge) = row.get::<_, Option<i64>>(1)? {
                        edges.insert(edge);
                    }
                }
            }
            if ids.is_empty() {
                return Ok(Graph::default());
            }

            let nodes = Self::nodes_by_ids(conn, &ids)?;
            let relationships = if edges.is_empty() {
                Vec::new()
            } else {
                let list = edges
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                query_relationships(
                    conn,
                    &format!(
                        "SELECT {} FROM relationships r WHERE r.id IN ({}) ORDER BY r.id",
                        RELATIONSHIP_COLUMNS, list
                    ),
                )?
            };
            Ok(Graph {
                nodes,
                relationships,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::{GraphStore, RepositoryOptions};
    use crate::network::RetryConfig;
    use serde_json::{json, Map};

    fn repo() -> GraphRepository {
        let store = GraphStore::open_in_memory(RetryConfig::store_conflicts(), None).unwrap();
        GraphRepository::new(store, RepositoryOptions::default())
    }

    fn node(repo: &GraphRepository, id: &str, labels: &[&str]) {
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        repo.create_or_update(id, &Map::new(), &labels).unwrap();
    }

    fn edge(repo: &GraphRepository, source: &str, target: &str, method: &str) {
        let props = json!({"method": method}).as_object().cloned().unwrap();
        repo.create_relationship(source, target, GraphConfig::DERIVED_FROM, &props)
            .unwrap()
            .unwrap();
    }

    fn ids(graph: &Graph) -> Vec<&str> {
        graph.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// m1 -> a, m1 -> b, m2 -> a, m2 -> b (twice), b -> root, x isolated.
    fn lineage() -> GraphRepository {
        let repo = repo();
        for id in ["m1", "m2", "a", "b", "root", "x"] {
            node(&repo, id, &["Model"]);
        }
        edge(&repo, "m1", "a", "tags");
        edge(&repo, "m1", "b", "tags");
        edge(&repo, "m2", "a", "tags");
        edge(&repo, "m2", "b", "tags");
        edge(&repo, "m2", "b", "mergekit_config");
        edge(&repo, "b", "root", "tags");
        repo
    }

    #[test]
    fn test_sub_graph_includes_cross_edges() {
        let repo = lineage();
        let graph = repo
            .get_sub_graph(
                "m1",
                &TraversalFilter {
                    max_depth: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(ids(&graph), vec!["a", "b", "m1", "m2", "root"]);
        assert_eq!(graph.relationships.len(), 6);
        assert!(graph.is_closed());
    }

    #[test]
    fn test_sub_graph_depth_limit() {
        let repo = lineage();
        let one_hop = repo
            .get_sub_graph(
                "m1",
                &TraversalFilter {
                    max_depth: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(ids(&one_hop), vec!["a", "b", "m1"]);
        assert_eq!(one_hop.relationships.len(), 2);
        assert!(one_hop.is_closed());

        let unbounded = repo.get_sub_graph("m1", &TraversalFilter::default()).unwrap();
        assert_eq!(unbounded.nodes.len(), 5);
    }

    #[test]
    fn test_sub_graph_isolated_and_missing() {
        let repo = lineage();
        let isolated = repo.get_sub_graph("x", &TraversalFilter::default()).unwrap();
        assert_eq!(ids(&isolated), vec!["x"]);
        assert!(isolated.relationships.is_empty());

        assert!(repo.get_sub_graph("missing", &TraversalFilter::default()).unwrap().is_empty());
        assert!(repo.get_sub_graph("", &TraversalFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_sub_graph_filters() {
        let repo = lineage();
        let graph = repo
            .get_sub_graph(
                "b",
                &TraversalFilter {
                    rel_type: Some("OTHER"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(ids(&graph), vec!["b"]);

        node(&repo, "m1", &["MergedModel"]);
        node(&repo, "m2", &["MergedModel"]);
        let merged_only = repo
            .get_sub_graph(
                "a",
                &TraversalFilter {
                    label: Some("MergedModel"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(ids(&merged_only), vec!["a", "m1", "m2"]);
    }

    #[test]
    fn test_sub_tree_directed_ancestry() {
        let repo = lineage();
        let tree = repo
            .get_sub_tree("m2", true, &TraversalFilter::default())
            .unwrap();

        assert_eq!(ids(&tree), vec!["a", "b", "m2", "root"]);
        assert_eq!(tree.relationships.len(), 4);
        assert!(tree.relationships.iter().all(|r| r.source != "m1"));
    }

    #[test]
    fn test_sub_tree_undirected_excludes_untraversed_edges() {
        let repo = lineage();
        let tree = repo
            .get_sub_tree(
                "root",
                false,
                &TraversalFilter {
                    max_depth: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(ids(&tree), vec!["b", "m1", "m2", "root"]);
        assert!(tree.relationships.iter().all(|r| r.target != "a"));
        assert!(tree.is_closed());
    }

    /// Five merges each derived from the same seven bases.
    fn dense_merges() -> GraphRepository {
        let repo = repo();
        for m in 0..5 {
            node(&repo, &format!("merge{}", m), &["Model", "MergedModel"]);
            for b in 0..7 {
                if m == 0 {
                    node(&repo, &format!("base{}", b), &["Model"]);
                }
                edge(&repo, &format!("merge{}", m), &format!("base{}", b), "mergekit_config");
            }
        }
        repo
    }

    #[test]
    fn test_sub_tree_dense_merges_unbounded() {
        let repo = dense_merges();

        let tree = repo
            .get_sub_tree("merge0", false, &TraversalFilter::default())
            .unwrap();
        assert_eq!(tree.nodes.len(), 12);
        assert_eq!(tree.relationships.len(), 35);
        assert!(tree.is_closed());

        let ancestry = repo
            .get_sub_tree("merge3", true, &TraversalFilter::default())
            .unwrap();
        assert_eq!(ancestry.nodes.len(), 8);
        assert_eq!(ancestry.relationships.len(), 7);
        assert!(ancestry.relationships.iter().all(|r| r.source == "merge3"));
    }

    #[test]
    fn test_sub_tree_dense_merges_bounded() {
        let repo = dense_merges();

        let tree = repo
            .get_sub_tree(
                "base0",
                false,
                &TraversalFilter {
                    max_depth: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(tree.nodes.len(), 12);
        assert_eq!(tree.relationships.len(), 35);

        let one_hop = repo
            .get_sub_tree(
                "base0",
                false,
                &TraversalFilter {
                    max_depth: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(one_hop.nodes.len(), 6);
        assert_eq!(one_hop.relationships.len(), 5);
    }

    #[test]
    fn test_generated_sql_escapes_start() {
        let sql = reachable_ids_sql("x'; DROP TABLE nodes; --", &TraversalFilter::default()).unwrap();
        assert!(sql.contains("'x''; DROP TABLE nodes; --'"));
        assert!(walk_sql("a", true, &TraversalFilter {
            label: Some("bad label"),
            ..Default::default()
        })
        .is_err());
    }
}
