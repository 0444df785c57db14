//! Data access over the graph store.

use super::fts::{TextIndexConfig, TextIndexManager};
use super::query::{
    label_condition, literal_list, property_key, quote_literal, rel_type_condition, validate_key,
    NodeQuery, SortOrder, RELATIONSHIP_COLUMNS,
};
use super::store::{encode_labels, query_nodes, row_to_node, value_from_sql, GraphStore};
use crate::config::{GraphConfig, Settings};
use crate::error::{MergeGraphError, Result};
use crate::models::{GraphNode, GraphRelationship, ModelNode};
use crate::search::LocalTextIndex;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tracing::{debug, info};

/// Exact-match property filters.
pub type Filters = BTreeMap<String, Value>;

/// Limits and search behavior.
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub max_depth: usize,
    pub results_limit: usize,
    pub native_text_search: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            max_depth: GraphConfig::DEFAULT_MAX_DEPTH,
            results_limit: GraphConfig::DEFAULT_RESULTS_LIMIT,
            native_text_search: true,
        }
    }
}

/// Parameters of [`GraphRepository::list_models`].
#[derive(Debug, Clone, Default)]
pub struct ListModelsQuery {
    /// Free-text query over the text fields.
    pub query: Option<String>,
    pub label: Option<String>,
    pub not_label: Option<String>,
    pub sort_key: Option<String>,
    pub sort_order: SortOrder,
    /// With a descending sort, drop rows whose sort key is null.
    pub exclude_null_on_sort_key: bool,
    pub filters: Filters,
    /// Drop rows where any of these properties equals the given value.
    pub exclude: Filters,
    /// Only models with a derivation edge to this id.
    pub base_model: Option<String>,
    pub limit: Option<usize>,
}

/// Graph repository.
pub struct GraphRepository {
    pub(super) store: GraphStore,
    pub(super) options: RepositoryOptions,
    local_index: Mutex<LocalTextIndex>,
}

impl std::fmt::Debug for GraphRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRepository")
            .field("store", &self.store)
            .field("options", &self.options)
            .finish()
    }
}

/// Serialize a property bag with sorted keys.
pub(crate) fn canonical_json(properties: &Map<String, Value>) -> Result<String> {
    let sorted: BTreeMap<&String, &Value> = properties.iter().collect();
    Ok(serde_json::to_string(&sorted)?)
}

fn without_nulls(properties: &Map<String, Value>) -> Map<String, Value> {
    properties
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Stored form of a timestamp: UTC with fixed millisecond precision, so that
/// string order matches time order.
pub(crate) fn normalize_timestamp(raw: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .ok()?;
    Some(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Drop nulls and `id`, and rewrite datetime fields to their stored form.
fn normalized(properties: &Map<String, Value>) -> Map<String, Value> {
    let mut props = without_nulls(properties);
    props.remove("id");
    for field in ModelNode::DATETIME_FIELDS {
        if let Some(Value::String(raw)) = props.get_mut(*field) {
            if let Some(stored) = normalize_timestamp(raw) {
                *raw = stored;
            }
        }
    }
    props
}

fn validate_properties(properties: &Map<String, Value>) -> Result<()> {
    for key in properties.keys() {
        if key != "id" {
            validate_key(key)?;
        }
    }
    Ok(())
}

fn fetch_node(conn: &Connection, id: &str) -> Result<Option<GraphNode>> {
    Ok(conn
        .query_row(
            "SELECT id, labels, properties FROM nodes WHERE id = ?1",
            params![id],
            row_to_node,
        )
        .optional()?)
}

impl GraphRepository {
    pub fn new(store: GraphStore, options: RepositoryOptions) -> Self {
        Self {
            store,
            options,
            local_index: Mutex::new(LocalTextIndex::new()),
        }
    }

    /// Open the store configured by `settings`.
    pub fn open(settings: &Settings) -> Result<Self> {
        let text_index = if settings.native_text_search {
            Some(TextIndexConfig::new(&settings.text_index_name)?)
        } else {
            None
        };
        let store = GraphStore::open(&settings.db_path, settings.store_retry.clone(), text_index)?;
        Ok(Self::new(
            store,
            RepositoryOptions {
                max_depth: settings.max_graph_depth,
                results_limit: settings.results_limit,
                native_text_search: settings.native_text_search,
            },
        ))
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    fn invalidate_local_index(&self) {
        if let Ok(mut index) = self.local_index.lock() {
            index.invalidate();
        }
    }

    // ----- reads -----

    pub fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        self.store.with_connection(|conn| fetch_node(conn, id))
    }

    pub fn get_model(&self, id: &str) -> Result<Option<ModelNode>> {
        self.get_node(id)?
            .map(|node| ModelNode::from_graph_node(&node))
            .transpose()
    }

    fn filtered(label: Option<&str>, filters: &Filters) -> NodeQuery {
        let mut query = NodeQuery::new();
        if let Some(label) = label {
            query = query.label(label);
        }
        for (key, value) in filters {
            query = query.where_eq(key, value);
        }
        query
    }

    pub fn count_nodes(&self, label: Option<&str>, filters: &Filters) -> Result<usize> {
        let sql = Self::filtered(label, filters).build_count()?;
        self.store.query_count(&sql)
    }

    /// Nodes matching every filter exactly; a null filter value matches
    /// absent properties.
    pub fn list_nodes(
        &self,
        label: Option<&str>,
        filters: &Filters,
        limit: Option<usize>,
    ) -> Result<Vec<GraphNode>> {
        let sql = Self::filtered(label, filters).limit(limit).build()?;
        self.store.query_nodes(&sql)
    }

    /// Nodes where `key` is set, in id order.
    pub fn nodes_with_property(&self, key: &str) -> Result<Vec<GraphNode>> {
        let sql = NodeQuery::new().where_not_null(key).build()?;
        self.store.query_nodes(&sql)
    }

    /// Distinct values of `key` across nodes with `label`, ascending, or by
    /// descending occurrence count when `sort_by_count` is set.
    pub fn list_property_values(
        &self,
        key: &str,
        label: Option<&str>,
        exclude_none: bool,
        sort_by_count: bool,
    ) -> Result<Vec<Value>> {
        let expr = property_key(key)?;
        let mut conditions = Vec::new();
        if let Some(label) = label {
            conditions.push(label_condition(label)?);
        }
        if exclude_none {
            conditions.push(format!("{} IS NOT NULL", expr));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let order = if sort_by_count {
            "COUNT(*) DESC, value ASC"
        } else {
            "value ASC"
        };
        let sql = format!(
            "SELECT {} AS value FROM nodes n{} GROUP BY value ORDER BY {}",
            expr, where_clause, order
        );

        self.store.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let values = stmt
                .query_map([], |row| Ok(value_from_sql(row.get_ref(0)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(values)
        })
    }

    fn local_text_search(&self, query: &str) -> Result<Option<Vec<String>>> {
        let version = self.store.data_version()?;
        let mut index = self.local_index.lock().map_err(|_| MergeGraphError::Database {
            message: "Failed to acquire text index lock".to_string(),
            source: None,
        })?;
        if index.needs_rebuild(version) {
            let nodes = self.store.query_nodes(&NodeQuery::new().build()?)?;
            index.rebuild(&nodes, version);
            debug!("Rebuilt local text index with {} nodes", index.len());
        }
        Ok(index.search(query).map(|ids| ids.into_iter().collect()))
    }

    /// Filtered, sorted model listing used by search.
    pub fn list_models(&self, params: &ListModelsQuery) -> Result<Vec<ModelNode>> {
        let mut query = Self::filtered(params.label.as_deref(), &params.filters);

        if let Some(not_label) = &params.not_label {
            query = query.without_label(not_label);
        }
        for (key, value) in &params.exclude {
            query = query.where_not_eq(key, value);
        }
        if let Some(base_model) = &params.base_model {
            query = query.derived_from(base_model);
        }
        if let Some(text) = params.query.as_deref().filter(|q| !q.trim().is_empty()) {
            match self.store.text_index() {
                Some(config) if self.options.native_text_search => {
                    query = query.text_match(&config.table_name, text);
                }
                _ => {
                    if let Some(ids) = self.local_text_search(text)? {
                        query = query.id_in(&ids);
                    }
                }
            }
        }
        if let Some(sort_key) = &params.sort_key {
            if params.exclude_null_on_sort_key && params.sort_order == SortOrder::Desc {
                query = query.where_not_null(sort_key);
            }
            query = query.order_by(sort_key, params.sort_order);
        }

        let limit = params.limit.unwrap_or(self.options.results_limit);
        let sql = query.limit(Some(limit)).build()?;
        self.store
            .query_nodes(&sql)?
            .iter()
            .map(ModelNode::from_graph_node)
            .collect()
    }

    pub fn list_relationships(
        &self,
        source: Option<&str>,
        target: Option<&str>,
        rel_type: Option<&str>,
    ) -> Result<Vec<GraphRelationship>> {
        let mut conditions = Vec::new();
        if let Some(source) = source {
            conditions.push(format!("r.source = {}", quote_literal(source)?));
        }
        if let Some(target) = target {
            conditions.push(format!("r.target = {}", quote_literal(target)?));
        }
        if let Some(rel_type) = rel_type {
            conditions.push(rel_type_condition("r", rel_type)?);
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM relationships r{} ORDER BY r.id",
            RELATIONSHIP_COLUMNS, where_clause
        );
        self.store.query_relationships(&sql)
    }

    // ----- writes -----

    /// Create the node if absent, otherwise merge `properties` into it.
    ///
    /// Per property last write wins; a null value removes the property.
    /// `labels` are added to the existing ones. Returns true when created.
    pub fn create_or_update(
        &self,
        id: &str,
        properties: &Map<String, Value>,
        labels: &[String],
    ) -> Result<bool> {
        if id.is_empty() {
            return Err(MergeGraphError::Validation {
                field: "id".into(),
                message: "node id must not be empty".into(),
            });
        }
        validate_properties(properties)?;

        let created = self.store.with_transaction(|tx| {
            let created = match fetch_node(tx, id)? {
                None => {
                    let props = normalized(properties);
                    tx.execute(
                        "INSERT INTO nodes (id, labels, properties) VALUES (?1, ?2, ?3)",
                        params![id, encode_labels(labels), canonical_json(&props)?],
                    )?;
                    true
                }
                Some(existing) => {
                    let mut props = existing.properties;
                    for (key, value) in properties {
                        if value.is_null() {
                            props.remove(key);
                        }
                    }
                    props.extend(normalized(properties));
                    let mut all_labels = existing.labels;
                    all_labels.extend(labels.iter().cloned());
                    tx.execute(
                        "UPDATE nodes SET labels = ?2, properties = ?3 WHERE id = ?1",
                        params![id, encode_labels(&all_labels), canonical_json(&props)?],
                    )?;
                    false
                }
            };
            Ok(created)
        })?;

        self.invalidate_local_index();
        Ok(created)
    }

    /// Merge `properties` into an existing node. Returns false when absent.
    pub fn set_properties(&self, id: &str, properties: &Map<String, Value>) -> Result<bool> {
        if self.get_node(id)?.is_none() {
            return Ok(false);
        }
        self.create_or_update(id, properties, &[])?;
        Ok(true)
    }

    /// Insert the node only if no node with `id` exists.
    pub fn create_if_absent(
        &self,
        id: &str,
        properties: &Map<String, Value>,
        labels: &[String],
    ) -> Result<bool> {
        validate_properties(properties)?;
        let json = canonical_json(&normalized(properties))?;
        let labels = encode_labels(labels);

        let inserted = self.store.with_connection(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO nodes (id, labels, properties) VALUES (?1, ?2, ?3)",
                params![id, labels, json],
            )?)
        })?;
        if inserted > 0 {
            self.invalidate_local_index();
        }
        Ok(inserted > 0)
    }

    /// Write a typed model record with upsert semantics.
    pub fn upsert_model(&self, model: &ModelNode) -> Result<bool> {
        self.create_or_update(&model.id, &model.to_properties()?, &model.labels)
    }

    /// Strip `keys` from every node (optionally only those with `label`).
    pub fn remove_properties(&self, keys: &[&str], label: Option<&str>) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let paths = keys
            .iter()
            .map(|k| validate_key(k).map(|k| format!("'$.{}'", k)))
            .collect::<Result<Vec<_>>>()?;
        let mut conditions = vec![format!(
            "({})",
            keys.iter()
                .map(|k| format!("json_type(n.properties, '$.{}') IS NOT NULL", k))
                .collect::<Vec<_>>()
                .join(" OR ")
        )];
        if let Some(label) = label {
            conditions.push(label_condition(label)?);
        }
        let sql = format!(
            "UPDATE nodes AS n SET properties = json_remove(n.properties, {}) WHERE {}",
            paths.join(", "),
            conditions.join(" AND ")
        );
        let changed = self.store.execute(&sql)?;
        self.invalidate_local_index();
        debug!("Removed {:?} from {} nodes", keys, changed);
        Ok(changed)
    }

    /// Create one directed edge between two existing nodes.
    ///
    /// Returns the new edge id, or `None` when an endpoint does not exist.
    pub fn create_relationship(
        &self,
        source: &str,
        target: &str,
        rel_type: &str,
        properties: &Map<String, Value>,
    ) -> Result<Option<i64>> {
        rel_type_condition("r", rel_type)?;
        let json = canonical_json(&without_nulls(properties))?;
        self.store.with_connection(|conn| insert_relationship(conn, source, target, rel_type, &json))
    }

    /// Like [`create_relationship`](Self::create_relationship) but returns the
    /// existing edge when one with identical type and properties is present.
    pub fn merge_relationship(
        &self,
        source: &str,
        target: &str,
        rel_type: &str,
        properties: &Map<String, Value>,
    ) -> Result<Option<i64>> {
        rel_type_condition("r", rel_type)?;
        let json = canonical_json(&without_nulls(properties))?;
        self.store.with_transaction(|tx| {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM relationships
                     WHERE source = ?1 AND target = ?2 AND rel_type = ?3 AND properties = ?4
                     LIMIT 1",
                    params![source, target, rel_type, json],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(id) => Ok(Some(id)),
                None => insert_relationship(tx, source, target, rel_type, &json),
            }
        })
    }

    /// Fold `src_id` into `dst_id`.
    ///
    /// - Source missing: no-op.
    /// - Destination missing: the source is renamed in place.
    /// - Both present: edges are repointed, `alt_ids` unioned, properties
    ///   missing on the destination copied over, then the source deleted.
    ///
    /// In every case the destination ends with the old id in `alt_ids`.
    /// Self loops created by repointing are dropped. Returns false when the
    /// source did not exist.
    pub fn merge_nodes(&self, src_id: &str, dst_id: &str) -> Result<bool> {
        if src_id == dst_id || src_id.is_empty() || dst_id.is_empty() {
            return Ok(false);
        }

        let merged = self.store.with_transaction(|tx| {
            let Some(src) = fetch_node(tx, src_id)? else {
                return Ok(false);
            };
            let dst = fetch_node(tx, dst_id)?;

            let mut alt_ids: BTreeSet<String> = BTreeSet::new();
            alt_ids.extend(alt_ids_of(&src));
            alt_ids.insert(src_id.to_string());

            let (mut props, labels) = match &dst {
                None => {
                    let mut props = src.properties.clone();
                    props.remove("new_id");
                    (props, src.labels.clone())
                }
                Some(dst) => {
                    alt_ids.extend(alt_ids_of(dst));
                    let mut props = dst.properties.clone();
                    for (key, value) in &src.properties {
                        if key == "alt_ids" || key == "new_id" || value.is_null() {
                            continue;
                        }
                        if props.get(key).map_or(true, Value::is_null) {
                            props.insert(key.clone(), value.clone());
                        }
                    }
                    let mut labels = dst.labels.clone();
                    labels.extend(src.labels.iter().cloned());
                    (props, labels)
                }
            };
            alt_ids.remove(dst_id);
            props.insert(
                "alt_ids".into(),
                Value::Array(alt_ids.into_iter().map(Value::String).collect()),
            );
            let json = canonical_json(&props)?;

            if dst.is_none() {
                tx.execute(
                    "UPDATE nodes SET id = ?2, labels = ?3, properties = ?4 WHERE id = ?1",
                    params![src_id, dst_id, encode_labels(&labels), json],
                )?;
            } else {
                tx.execute(
                    "UPDATE nodes SET labels = ?2, properties = ?3 WHERE id = ?1",
                    params![dst_id, encode_labels(&labels), json],
                )?;
                tx.execute("DELETE FROM nodes WHERE id = ?1", params![src_id])?;
            }
            // Edges between the two nodes would turn into self-loops.
            tx.execute(
                "DELETE FROM relationships
                 WHERE (source = ?1 AND target IN (?1, ?2)) OR (source = ?2 AND target = ?1)",
                params![src_id, dst_id],
            )?;
            tx.execute(
                "UPDATE relationships SET source = ?2 WHERE source = ?1",
                params![src_id, dst_id],
            )?;
            tx.execute(
                "UPDATE relationships SET target = ?2 WHERE target = ?1",
                params![src_id, dst_id],
            )?;
            Ok(true)
        })?;

        if merged {
            self.invalidate_local_index();
            info!("Merged node {} into {}", src_id, dst_id);
        }
        Ok(merged)
    }

    /// Delete every node and relationship.
    pub fn delete_all(&self) -> Result<()> {
        self.store.with_transaction(|tx| {
            tx.execute("DELETE FROM relationships", [])?;
            tx.execute("DELETE FROM nodes", [])?;
            Ok(())
        })?;
        self.invalidate_local_index();
        info!("Deleted all nodes and relationships");
        Ok(())
    }

    /// Rebuild whichever text index is in use.
    pub fn rebuild_text_index(&self) -> Result<()> {
        match self.store.text_index() {
            Some(config) if self.options.native_text_search => {
                let config = config.clone();
                self.store
                    .with_connection(|conn| TextIndexManager::new(&config).rebuild(conn))
            }
            _ => {
                let version = self.store.data_version()?;
                let nodes = self.store.query_nodes(&NodeQuery::new().build()?)?;
                let mut index = self.local_index.lock().map_err(|_| MergeGraphError::Database {
                    message: "Failed to acquire text index lock".to_string(),
                    source: None,
                })?;
                index.rebuild(&nodes, version);
                info!("Rebuilt local text index with {} nodes", index.len());
                Ok(())
            }
        }
    }

    /// All nodes with the given ids, in id order.
    pub(super) fn nodes_by_ids(conn: &Connection, ids: &BTreeSet<String>) -> Result<Vec<GraphNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&String> = ids.iter().collect();
        let sql = NodeQuery::new().id_in(&ids).build()?;
        query_nodes(conn, &sql)
    }
}

fn alt_ids_of(node: &GraphNode) -> Vec<String> {
    match node.properties.get("alt_ids") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn insert_relationship(
    conn: &Connection,
    source: &str,
    target: &str,
    rel_type: &str,
    properties_json: &str,
) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT INTO relationships (source, target, rel_type, properties)
         SELECT ?1, ?2, ?3, ?4
         WHERE EXISTS (SELECT 1 FROM nodes WHERE id = ?1)
           AND EXISTS (SELECT 1 FROM nodes WHERE id = ?2)",
        params![source, target, rel_type, properties_json],
    )?;
    if inserted == 0 {
        debug!("Skipped {} edge {} -> {}: missing endpoint", rel_type, source, target);
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

/// Literal list helper re-exported for traversal queries.
pub(super) fn id_literals(ids: &BTreeSet<String>) -> Result<String> {
    let ids: Vec<&String> = ids.iter().collect();
    literal_list(&ids)
}
