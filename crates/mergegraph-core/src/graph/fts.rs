//! Full-text index over node text properties, backed by SQLite FTS5.
//!
//! The table mirrors the text fields of every node and is kept in sync with
//! the `nodes` table by triggers, so writes never touch it directly.

use crate::config::is_identifier;
use crate::error::{MergeGraphError, Result};
use crate::models::ModelNode;
use rusqlite::Connection;
use tracing::{debug, info};

/// Name and tokenizer of the text index.
#[derive(Debug, Clone)]
pub struct TextIndexConfig {
    pub table_name: String,
    pub tokenizer: String,
}

impl TextIndexConfig {
    pub fn new(table_name: impl Into<String>) -> Result<Self> {
        let table_name = table_name.into();
        if !is_identifier(&table_name) {
            return Err(MergeGraphError::Config {
                message: format!("invalid text index name: {}", table_name),
            });
        }
        Ok(Self {
            table_name,
            tokenizer: "unicode61 remove_diacritics 1 tokenchars '_'".to_string(),
        })
    }
}

/// Trigger suffix, event, and body. `{t}` is the index table, `{c}` its
/// columns and `{v}` the values extracted from `NEW`.
const TRIGGERS: [(&str, &str, &str); 3] = [
    ("ai", "INSERT", "INSERT INTO {t} (id, {c}) VALUES (NEW.id, {v});"),
    (
        "au",
        "UPDATE",
        "DELETE FROM {t} WHERE id = OLD.id; INSERT INTO {t} (id, {c}) VALUES (NEW.id, {v});",
    ),
    ("ad", "DELETE", "DELETE FROM {t} WHERE id = OLD.id;"),
];

/// Creates, fills and rebuilds the text index of one connection.
pub struct TextIndexManager<'a> {
    config: &'a TextIndexConfig,
}

impl<'a> TextIndexManager<'a> {
    pub fn new(config: &'a TextIndexConfig) -> Self {
        Self { config }
    }

    fn text_columns() -> impl Iterator<Item = &'static str> {
        ModelNode::TEXT_FIELDS.iter().copied().filter(|f| *f != "id")
    }

    /// `json_extract` expressions for the text columns of row alias `row`.
    fn column_values(row: &str) -> String {
        Self::text_columns()
            .map(|f| format!("json_extract({}.properties, '$.{}')", row, f))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn column_names() -> String {
        Self::text_columns().collect::<Vec<_>>().join(", ")
    }

    fn trigger_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.config.table_name, suffix)
    }

    fn schema_has(conn: &Connection, kind: &str, name: &str) -> Result<bool> {
        let found = conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2")?
            .exists([kind, name])?;
        Ok(found)
    }

    pub fn table_exists(&self, conn: &Connection) -> Result<bool> {
        Self::schema_has(conn, "table", &self.config.table_name)
    }

    /// True when every sync trigger is installed.
    pub fn triggers_exist(&self, conn: &Connection) -> Result<bool> {
        for (suffix, _, _) in TRIGGERS {
            if !Self::schema_has(conn, "trigger", &self.trigger_name(suffix))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Install the table and triggers if missing. The table is refilled
    /// whenever it may have drifted from `nodes`.
    pub fn ensure_setup(&self, conn: &Connection) -> Result<()> {
        let stale = match (self.table_exists(conn)?, self.triggers_exist(conn)?) {
            (false, _) => {
                self.create_table(conn)?;
                true
            }
            (true, synced) => !synced,
        };
        self.create_triggers(conn)?;
        if stale {
            self.populate(conn)?;
        }
        Ok(())
    }

    pub fn create_table(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING fts5(id, {}, tokenize=\"{}\");",
            self.config.table_name,
            Self::column_names(),
            self.config.tokenizer
        ))?;
        info!("Created text index {}", self.config.table_name);
        Ok(())
    }

    pub fn create_triggers(&self, conn: &Connection) -> Result<()> {
        let columns = Self::column_names();
        let values = Self::column_values("NEW");
        let sql: String = TRIGGERS
            .iter()
            .map(|(suffix, event, body)| {
                let body = body
                    .replace("{t}", &self.config.table_name)
                    .replace("{c}", &columns)
                    .replace("{v}", &values);
                format!(
                    "CREATE TRIGGER IF NOT EXISTS {} AFTER {} ON nodes BEGIN {} END;\n",
                    self.trigger_name(suffix),
                    event,
                    body
                )
            })
            .collect();
        conn.execute_batch(&sql)?;
        debug!("Installed sync triggers for {}", self.config.table_name);
        Ok(())
    }

    /// Refill the table from `nodes`.
    pub fn populate(&self, conn: &Connection) -> Result<()> {
        let table = &self.config.table_name;
        conn.execute_batch(&format!(
            "DELETE FROM {t}; INSERT INTO {t} (id, {c}) SELECT n.id, {v} FROM nodes n;",
            t = table,
            c = Self::column_names(),
            v = Self::column_values("n")
        ))?;
        info!("Filled text index {} from nodes", table);
        Ok(())
    }

    /// Drop and recreate table and triggers.
    pub fn rebuild(&self, conn: &Connection) -> Result<()> {
        let mut sql = format!("DROP TABLE IF EXISTS {};", self.config.table_name);
        for (suffix, _, _) in TRIGGERS {
            sql.push_str(&format!(" DROP TRIGGER IF EXISTS {};", self.trigger_name(suffix)));
        }
        conn.execute_batch(&sql)?;

        self.create_table(conn)?;
        self.create_triggers(conn)?;
        self.populate(conn)
    }

    /// Number of indexed rows.
    pub fn row_count(&self, conn: &Connection) -> Result<usize> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.config.table_name),
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE nodes (id TEXT PRIMARY KEY, labels TEXT NOT NULL, properties TEXT NOT NULL);
             INSERT INTO nodes VALUES ('A/x', ':Model:', '{\"description\":\"a slerp merge of mistral\"}');",
        )
        .unwrap();
        conn
    }

    fn search(conn: &Connection, table: &str, query: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("SELECT id FROM {} WHERE {} MATCH ?1", table, table))
            .unwrap();
        stmt.query_map([query], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_setup_populates_existing_rows() {
        let conn = create_test_db();
        let config = TextIndexConfig::new("model_text_index").unwrap();
        let manager = TextIndexManager::new(&config);

        manager.ensure_setup(&conn).unwrap();

        assert!(manager.table_exists(&conn).unwrap());
        assert!(manager.triggers_exist(&conn).unwrap());
        assert_eq!(search(&conn, "model_text_index", "slerp*"), vec!["A/x"]);
    }

    #[test]
    fn test_triggers_follow_writes() {
        let conn = create_test_db();
        let config = TextIndexConfig::new("model_text_index").unwrap();
        let manager = TextIndexManager::new(&config);
        manager.ensure_setup(&conn).unwrap();

        conn.execute(
            "INSERT INTO nodes VALUES ('B/y', ':Model:', '{\"license\":\"mit\",\"name\":\"llama_base\"}')",
            [],
        )
        .unwrap();
        conn.execute("UPDATE nodes SET id = 'C/z' WHERE id = 'A/x'", [])
            .unwrap();

        assert_eq!(search(&conn, "model_text_index", "\"llama_base\"*"), vec!["B/y"]);
        assert_eq!(search(&conn, "model_text_index", "mistral*"), vec!["C/z"]);

        conn.execute("DELETE FROM nodes WHERE id = 'B/y'", []).unwrap();
        assert_eq!(manager.row_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_rebuild() {
        let conn = create_test_db();
        let config = TextIndexConfig::new("model_text_index").unwrap();
        let manager = TextIndexManager::new(&config);
        manager.ensure_setup(&conn).unwrap();

        manager.rebuild(&conn).unwrap();
        assert_eq!(manager.row_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_invalid_table_name() {
        assert!(TextIndexConfig::new("idx; DROP TABLE nodes").is_err());
    }
}
