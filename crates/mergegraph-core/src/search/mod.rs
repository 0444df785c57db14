//! In-process inverted index over node text fields.
//!
//! Used by the repository when the store's native FTS5 index is disabled.
//! Tokens are lowercase alphanumeric runs; a query matches a node when every
//! query token is a prefix of some token of that node.

use crate::models::{GraphNode, ModelNode};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Token to node id postings.
#[derive(Debug, Default)]
pub struct LocalTextIndex {
    postings: BTreeMap<String, BTreeSet<String>>,
    documents: usize,
    dirty: bool,
    version: Option<i64>,
}

impl LocalTextIndex {
    pub fn new() -> Self {
        Self {
            dirty: true,
            ..Default::default()
        }
    }

    /// Whether the index must be rebuilt before the next search.
    ///
    /// `store_version` is the store's current change counter.
    pub fn needs_rebuild(&self, store_version: i64) -> bool {
        self.dirty || self.version != Some(store_version)
    }

    /// Mark stale after a local write.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents == 0
    }

    /// Replace the index contents with `nodes`.
    pub fn rebuild<'a>(&mut self, nodes: impl IntoIterator<Item = &'a GraphNode>, version: i64) {
        self.postings.clear();
        self.documents = 0;
        for node in nodes {
            self.add(node);
        }
        self.dirty = false;
        self.version = Some(version);
    }

    fn add(&mut self, node: &GraphNode) {
        let mut tokens: BTreeSet<String> = tokenize(&node.id).into_iter().collect();
        for field in ModelNode::TEXT_FIELDS {
            if let Some(Value::String(text)) = node.properties.get(*field) {
                tokens.extend(tokenize(text));
            }
        }
        for token in tokens {
            self.postings.entry(token).or_default().insert(node.id.clone());
        }
        self.documents += 1;
    }

    fn prefix_matches(&self, prefix: &str) -> BTreeSet<String> {
        self.postings
            .range(prefix.to_string()..)
            .take_while(|(token, _)| token.starts_with(prefix))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Ids of nodes matching every token of `query`.
    ///
    /// Returns `None` for a query without tokens (no filtering).
    pub fn search(&self, query: &str) -> Option<BTreeSet<String>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return None;
        }

        let mut result: Option<BTreeSet<String>> = None;
        for token in tokens {
            let matches = self.prefix_matches(&token);
            let next = match result {
                None => matches,
                Some(current) => current.intersection(&matches).cloned().collect(),
            };
            if next.is_empty() {
                return Some(next);
            }
            result = Some(next);
        }
        result
    }
}
