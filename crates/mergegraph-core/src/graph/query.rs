//! SQL construction for the graph store.
//!
//! Not every value can be bound as a statement parameter (recursive CTEs and
//! dynamically composed filters are assembled as text), so every literal that
//! reaches a query goes through one of the escaping functions here:
//! - [`quote_literal`] for string values
//! - [`escape_like`] for `LIKE` patterns (used with `ESCAPE '\'`)
//! - [`property_key`] for JSON property paths
//! - [`build_fts5_query`] for full-text `MATCH` expressions

use crate::config::{is_identifier, GraphConfig};
use crate::error::{MergeGraphError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Characters that force quoting of an FTS5 term.
static FTS5_SPECIAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^\p{L}\p{N}]"#).unwrap());

/// Columns selected for every node query, in row order.
pub const NODE_COLUMNS: &str = "n.id, n.labels, n.properties";

/// Columns selected for every relationship query, in row order.
pub const RELATIONSHIP_COLUMNS: &str = "r.id, r.source, r.target, r.rel_type, r.properties";

fn invalid(message: impl Into<String>) -> MergeGraphError {
    MergeGraphError::Query {
        message: message.into(),
    }
}

/// Quote a string as an SQL literal, doubling embedded single quotes.
///
/// NUL characters are rejected since SQLite truncates text at them.
pub fn quote_literal(value: &str) -> Result<String> {
    if value.contains('\0') {
        return Err(invalid("string literal contains a NUL character"));
    }
    Ok(format!("'{}'", value.replace('\'', "''")))
}

/// Escape `LIKE` wildcards and the escape character itself.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Validate a property name for use in a JSON path.
pub fn validate_key(key: &str) -> Result<&str> {
    if is_identifier(key) {
        Ok(key)
    } else {
        Err(invalid(format!("invalid property key: {:?}", key)))
    }
}

/// SQL expression reading property `key` of node alias `n`.
///
/// `id` maps to the primary key column.
pub fn property_key(key: &str) -> Result<String> {
    let key = validate_key(key)?;
    if key == "id" {
        return Ok("n.id".to_string());
    }
    Ok(format!("json_extract(n.properties, '$.{}')", key))
}

/// SQL literal for a scalar JSON value; `None` for null.
pub fn value_literal(value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::String(s) => quote_literal(s).map(Some),
        Value::Array(_) | Value::Object(_) => {
            Err(invalid("only scalar values can be used as filters"))
        }
    }
}

/// Condition matching nodes carrying `label`.
pub fn label_condition(label: &str) -> Result<String> {
    if !is_identifier(label) {
        return Err(invalid(format!("invalid label: {:?}", label)));
    }
    Ok(format!(
        "n.labels LIKE {} ESCAPE '\\'",
        quote_literal(&format!("%:{}:%", escape_like(label)))?
    ))
}

/// Condition restricting a relationship alias to a type.
pub fn rel_type_condition(alias: &str, rel_type: &str) -> Result<String> {
    if !is_identifier(rel_type) {
        return Err(invalid(format!("invalid relationship type: {:?}", rel_type)));
    }
    Ok(format!("{}.rel_type = {}", alias, quote_literal(rel_type)?))
}

/// Comma separated list of quoted literals.
pub fn literal_list<S: AsRef<str>>(values: &[S]) -> Result<String> {
    values
        .iter()
        .map(|v| quote_literal(v.as_ref()))
        .collect::<Result<Vec<_>>>()
        .map(|v| v.join(", "))
}

/// Escape a term for FTS5 queries.
///
/// Terms containing anything but letters and digits are wrapped in quotes.
pub fn escape_fts5_term(term: &str) -> String {
    if FTS5_SPECIAL_CHARS.is_match(term) {
        let escaped = term.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    } else {
        term.to_string()
    }
}

/// Build an FTS5 query requiring every term, with prefix matching.
///
/// - "mistral slerp" → `mistral* AND slerp*`
/// - "dare_ties" → `"dare_ties"*`
pub fn build_fts5_query(search_term: &str) -> String {
    search_term
        .to_lowercase()
        .split_whitespace()
        .map(|term| format!("{}*", escape_fts5_term(term)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Fluent builder for node queries.
///
/// Errors from escaping are deferred to [`NodeQuery::build`] so calls can be
/// chained.
#[derive(Debug, Default)]
pub struct NodeQuery {
    conditions: Vec<String>,
    order: Option<(String, SortOrder)>,
    limit: Option<usize>,
    error: Option<MergeGraphError>,
}

impl NodeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, condition: Result<String>) -> Self {
        match condition {
            Ok(c) => self.conditions.push(c),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    pub fn label(self, label: &str) -> Self {
        self.push(label_condition(label))
    }

    pub fn without_label(self, label: &str) -> Self {
        self.push(label_condition(label).map(|c| format!("NOT ({})", c)))
    }

    /// Exact match; a null value matches absent properties.
    pub fn where_eq(self, key: &str, value: &Value) -> Self {
        let condition = property_key(key).and_then(|expr| {
            Ok(match value_literal(value)? {
                Some(literal) => format!("{} = {}", expr, literal),
                None => format!("{} IS NULL", expr),
            })
        });
        self.push(condition)
    }

    /// Negated match; absent properties always pass.
    pub fn where_not_eq(self, key: &str, value: &Value) -> Self {
        let condition = property_key(key).and_then(|expr| {
            Ok(match value_literal(value)? {
                Some(literal) => format!("({} IS NULL OR {} != {})", expr, expr, literal),
                None => format!("{} IS NOT NULL", expr),
            })
        });
        self.push(condition)
    }

    pub fn where_not_null(self, key: &str) -> Self {
        self.push(property_key(key).map(|expr| format!("{} IS NOT NULL", expr)))
    }

    /// Nodes with a derivation edge pointing at `base_id`.
    pub fn derived_from(self, base_id: &str) -> Self {
        let condition = quote_literal(base_id).and_then(|base| {
            Ok(format!(
                "EXISTS (SELECT 1 FROM relationships r WHERE r.source = n.id AND {} AND r.target = {})",
                rel_type_condition("r", GraphConfig::DERIVED_FROM)?,
                base
            ))
        });
        self.push(condition)
    }

    pub fn id_in<S: AsRef<str>>(self, ids: &[S]) -> Self {
        if ids.is_empty() {
            return self.push(Ok("0".to_string()));
        }
        self.push(literal_list(ids).map(|list| format!("n.id IN ({})", list)))
    }

    /// Full-text match against the FTS5 table `table`.
    pub fn text_match(self, table: &str, query: &str) -> Self {
        let fts = build_fts5_query(query);
        if fts.is_empty() {
            return self;
        }
        if !is_identifier(table) {
            return self.push(Err(invalid(format!("invalid text index: {:?}", table))));
        }
        self.push(
            quote_literal(&fts)
                .map(|q| format!("n.id IN (SELECT id FROM {} WHERE {} MATCH {})", table, table, q)),
        )
    }

    pub fn order_by(mut self, key: &str, order: SortOrder) -> Self {
        match property_key(key) {
            Ok(expr) => self.order = Some((expr, order)),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// `SELECT` returning [`NODE_COLUMNS`].
    pub fn build(self) -> Result<String> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut sql = format!("SELECT {} FROM nodes n{}", NODE_COLUMNS, self.where_clause());
        match &self.order {
            Some((expr, order)) if expr == "n.id" => {
                sql.push_str(&format!(" ORDER BY n.id {}", order.sql()))
            }
            Some((expr, order)) => {
                sql.push_str(&format!(" ORDER BY {} {}, n.id ASC", expr, order.sql()))
            }
            None => sql.push_str(" ORDER BY n.id ASC"),
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok(sql)
    }

    /// `SELECT COUNT(*)` over the same conditions.
    pub fn build_count(self) -> Result<String> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(format!("SELECT COUNT(*) FROM nodes n{}", self.where_clause()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("plain").unwrap(), "'plain'");
        assert_eq!(quote_literal("O'Brien").unwrap(), "'O''Brien'");
        assert_eq!(
            quote_literal("x'); DROP TABLE nodes; --").unwrap(),
            "'x''); DROP TABLE nodes; --'"
        );
        assert_eq!(quote_literal(r"back\slash").unwrap(), r"'back\slash'");
        assert!(quote_literal("nul\0byte").is_err());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%_sure"), r"100\%\_sure");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("Model"), "Model");
    }

    #[test]
    fn test_property_key() {
        assert_eq!(property_key("id").unwrap(), "n.id");
        assert_eq!(
            property_key("average_score").unwrap(),
            "json_extract(n.properties, '$.average_score')"
        );
        assert!(property_key("a.b").is_err());
        assert!(property_key("x') OR 1=1 --").is_err());
        assert!(property_key("").is_err());
    }

    #[test]
    fn test_value_literal() {
        assert_eq!(value_literal(&json!(true)).unwrap().unwrap(), "1");
        assert_eq!(value_literal(&json!(3.5)).unwrap().unwrap(), "3.5");
        assert_eq!(value_literal(&json!("it's")).unwrap().unwrap(), "'it''s'");
        assert!(value_literal(&json!(null)).unwrap().is_none());
        assert!(value_literal(&json!([1])).is_err());
    }

    #[test]
    fn test_build_fts5_query() {
        assert_eq!(build_fts5_query("Mistral slerp"), "mistral* AND slerp*");
        assert_eq!(build_fts5_query("dare_ties"), "\"dare_ties\"*");
        assert_eq!(build_fts5_query("say\"hi"), "\"say\"\"hi\"*");
        assert_eq!(build_fts5_query("   "), "");
    }

    #[test]
    fn test_node_query() {
        let sql = NodeQuery::new()
            .label("Model")
            .without_label("MergedModel")
            .where_eq("license", &json!("mit"))
            .where_eq("private", &json!(false))
            .where_eq("merge_method", &Value::Null)
            .order_by("likes", SortOrder::Desc)
            .limit(Some(10))
            .build()
            .unwrap();

        assert_eq!(
            sql,
            "SELECT n.id, n.labels, n.properties FROM nodes n WHERE \
             n.labels LIKE '%:Model:%' ESCAPE '\\' AND \
             NOT (n.labels LIKE '%:MergedModel:%' ESCAPE '\\') AND \
             json_extract(n.properties, '$.license') = 'mit' AND \
             json_extract(n.properties, '$.private') = 0 AND \
             json_extract(n.properties, '$.merge_method') IS NULL \
             ORDER BY json_extract(n.properties, '$.likes') DESC, n.id ASC LIMIT 10"
        );
    }

    #[test]
    fn test_node_query_defers_errors() {
        let result = NodeQuery::new()
            .where_eq("bad key", &json!(1))
            .label("Model")
            .build();
        assert!(matches!(result, Err(MergeGraphError::Query { .. })));
        assert!(NodeQuery::new().label("Bad:Label").build_count().is_err());
    }

    #[test]
    fn test_where_not_eq_keeps_absent() {
        let sql = NodeQuery::new()
            .where_not_eq("private", &json!(true))
            .build_count()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM nodes n WHERE (json_extract(n.properties, '$.private') IS NULL \
             OR json_extract(n.properties, '$.private') != 1)"
        );
    }

    #[test]
    fn test_id_in_empty_matches_nothing() {
        let sql = NodeQuery::new().id_in::<String>(&[]).build_count().unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM nodes n WHERE 0");
    }
}
