//! SQLite-backed property graph store.
//!
//! Nodes carry `:`-delimited labels and a JSON property bag; relationships
//! form a directed multigraph. Every statement runs through
//! [`GraphStore::with_connection`] or [`GraphStore::with_transaction`], which
//! retry transient lock/busy failures with the configured policy.

use super::fts::{TextIndexConfig, TextIndexManager};
use crate::config::GraphConfig;
use crate::error::{MergeGraphError, Result};
use crate::models::{GraphNode, GraphRelationship};
use crate::network::{retry_blocking, RetryConfig};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row, Transaction};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Embedded graph database.
#[derive(Clone)]
pub struct GraphStore {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
    retry: RetryConfig,
    text_index: Option<TextIndexConfig>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("db_path", &self.db_path)
            .field("text_index", &self.text_index.as_ref().map(|c| &c.table_name))
            .finish()
    }
}

impl GraphStore {
    /// Create or open a store at `db_path`.
    ///
    /// With `text_index`, an FTS5 table is created and kept in sync.
    pub fn open(
        db_path: impl Into<PathBuf>,
        retry: RetryConfig,
        text_index: Option<TextIndexConfig>,
    ) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| MergeGraphError::Io {
                    message: format!("Failed to create directory {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::configure_connection(&conn, true)?;
        Self::from_connection(conn, Some(db_path), retry, text_index)
    }

    /// Private in-memory store, for tests and one-off processing.
    pub fn open_in_memory(retry: RetryConfig, text_index: Option<TextIndexConfig>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn, false)?;
        Self::from_connection(conn, None, retry, text_index)
    }

    fn from_connection(
        conn: Connection,
        db_path: Option<PathBuf>,
        retry: RetryConfig,
        text_index: Option<TextIndexConfig>,
    ) -> Result<Self> {
        Self::ensure_schema(&conn)?;
        if let Some(config) = &text_index {
            TextIndexManager::new(config).ensure_setup(&conn)?;
        }

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
            retry,
            text_index,
        })
    }

    fn configure_connection(conn: &Connection, file_backed: bool) -> Result<()> {
        conn.busy_timeout(GraphConfig::BUSY_TIMEOUT)?;
        if file_backed {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                ",
            )?;
        }
        conn.execute_batch("PRAGMA temp_store=MEMORY;")?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                labels TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}'
            );
            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source);
            CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target);
            ",
        )?;
        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn text_index(&self) -> Option<&TextIndexConfig> {
        self.text_index.as_ref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MergeGraphError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        })
    }

    /// Run `f` against the connection, retrying transient failures.
    pub fn with_connection<T>(&self, mut f: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let (result, stats) = retry_blocking(
            &self.retry,
            || {
                let conn = self.lock()?;
                f(&conn)
            },
            MergeGraphError::is_transient,
        );
        if stats.attempts > 1 && result.is_ok() {
            debug!("Graph query succeeded after {} attempts", stats.attempts);
        }
        result
    }

    /// Run `f` inside one transaction, retrying the whole transaction on
    /// transient failures.
    pub fn with_transaction<T>(
        &self,
        mut f: impl FnMut(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let (result, _) = retry_blocking(
            &self.retry,
            || {
                let mut conn = self.lock()?;
                let tx = conn.transaction()?;
                let value = f(&tx)?;
                tx.commit()?;
                Ok(value)
            },
            MergeGraphError::is_transient,
        );
        if let Err(e) = &result {
            if e.is_transient() {
                warn!("Graph transaction gave up after retries: {}", e);
            }
        }
        result
    }

    /// Execute a statement, returning the number of changed rows.
    pub fn execute(&self, sql: &str) -> Result<usize> {
        self.with_connection(|conn| Ok(conn.execute(sql, [])?))
    }

    /// Run a node query built with [`super::query::NodeQuery`].
    pub fn query_nodes(&self, sql: &str) -> Result<Vec<GraphNode>> {
        self.with_connection(|conn| query_nodes(conn, sql))
    }

    pub fn query_relationships(&self, sql: &str) -> Result<Vec<GraphRelationship>> {
        self.with_connection(|conn| query_relationships(conn, sql))
    }

    /// Single integer result.
    pub fn query_count(&self, sql: &str) -> Result<usize> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Counter that changes whenever another connection commits.
    pub fn data_version(&self) -> Result<i64> {
        self.with_connection(|conn| {
            Ok(conn.query_row("PRAGMA data_version", [], |row| row.get(0))?)
        })
    }
}

/// `:A:B:` label encoding.
pub fn encode_labels<S: AsRef<str>>(labels: &[S]) -> String {
    let mut encoded = String::from(":");
    let mut seen = Vec::new();
    for label in labels {
        let label = label.as_ref();
        if label.is_empty() || seen.contains(&label) {
            continue;
        }
        seen.push(label);
        encoded.push_str(label);
        encoded.push(':');
    }
    encoded
}

pub fn decode_labels(encoded: &str) -> Vec<String> {
    encoded
        .split(':')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn conversion_error(index: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_properties(row: &Row<'_>, index: usize) -> rusqlite::Result<Map<String, Value>> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(index, e))
}

/// Map a row of [`super::query::NODE_COLUMNS`].
pub fn row_to_node(row: &Row<'_>) -> rusqlite::Result<GraphNode> {
    let labels: String = row.get(1)?;
    Ok(GraphNode {
        id: row.get(0)?,
        labels: decode_labels(&labels),
        properties: parse_properties(row, 2)?,
    })
}

/// Map a row of [`super::query::RELATIONSHIP_COLUMNS`].
pub fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<GraphRelationship> {
    Ok(GraphRelationship {
        id: row.get(0)?,
        source: row.get(1)?,
        target: row.get(2)?,
        rel_type: row.get(3)?,
        properties: parse_properties(row, 4)?,
    })
}

/// Convert a raw SQLite value to JSON.
pub fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

pub fn query_nodes(conn: &Connection, sql: &str) -> Result<Vec<GraphNode>> {
    let mut stmt = conn.prepare(sql)?;
    let nodes = stmt
        .query_map([], row_to_node)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
}

pub fn query_relationships(conn: &Connection, sql: &str) -> Result<Vec<GraphRelationship>> {
    let mut stmt = conn.prepare(sql)?;
    let relationships = stmt
        .query_map([], row_to_relationship)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(relationships)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_retry() -> RetryConfig {
        RetryConfig::store_conflicts()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_labels_roundtrip() {
        assert_eq!(encode_labels(&["Model", "MergedModel", "Model"]), ":Model:MergedModel:");
        assert_eq!(decode_labels(":Model:MergedModel:"), vec!["Model", "MergedModel"]);
        assert!(decode_labels(":").is_empty());
    }

    #[test]
    fn test_open_creates_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("graph.sqlite");
        let store = GraphStore::open(
            &db_path,
            fast_retry(),
            Some(TextIndexConfig::new("model_text_index").unwrap()),
        )
        .unwrap();

        assert!(db_path.exists());
        assert_eq!(store.query_count("SELECT COUNT(*) FROM nodes").unwrap(), 0);
        assert_eq!(
            store
                .query_count("SELECT COUNT(*) FROM model_text_index")
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let store = GraphStore::open_in_memory(fast_retry(), None).unwrap();
        let mut calls = 0;

        let value = store
            .with_connection(|_| {
                calls += 1;
                if calls < 3 {
                    Err(MergeGraphError::Database {
                        message: "database is locked".into(),
                        source: None,
                    })
                } else {
                    Ok(7)
                }
            })
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_non_transient_errors_propagate() {
        let store = GraphStore::open_in_memory(fast_retry(), None).unwrap();
        let mut calls = 0;

        let result = store.with_connection(|conn| {
            calls += 1;
            Ok(conn.execute("SELECT * FROM missing_table", [])?)
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = GraphStore::open_in_memory(fast_retry(), None).unwrap();

        let result: Result<()> = store.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO nodes (id, labels, properties) VALUES ('A/x', ':Model:', '{}')",
                [],
            )?;
            Err(MergeGraphError::Other("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.query_count("SELECT COUNT(*) FROM nodes").unwrap(), 0);
    }
}
