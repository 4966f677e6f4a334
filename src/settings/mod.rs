//! Per-collection admin hints
//!
//! An operator can pin the set of indexes the planner is allowed to
//! consider for a query shape. Entries keep the defining (query, sort,
//! projection) documents so the shape can be re-canonicalized when hints
//! are cleared in bulk and the coupled plan cache entries invalidated.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::plancache::IndexEntry;
use crate::query::{CanonicalQuery, ShapeKey};
use crate::util::ordered_object_eq;

/// One pinned hint: the shape's defining documents plus the allowed index
/// key patterns, in the order the operator supplied them.
#[derive(Debug, Clone)]
pub struct AllowedIndexEntry {
    pub query: Value,
    pub sort: Value,
    pub projection: Value,
    pub index_key_patterns: Vec<Value>,
}

/// Planner-facing projection of an entry: just the allowed key patterns.
#[derive(Debug, Clone)]
pub struct AllowedIndices {
    pub index_key_patterns: Vec<Value>,
}

/// Shape-keyed store of admin hints for one collection
#[derive(Debug, Default)]
pub struct QuerySettings {
    entries: Mutex<HashMap<ShapeKey, AllowedIndexEntry>>,
}

impl QuerySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the allowed indexes for the query's shape, replacing any prior
    /// entry.
    pub fn set_allowed_indices(&self, query: &CanonicalQuery, indexes: &[Value]) {
        let parsed = query.parsed();
        let entry = AllowedIndexEntry {
            query: parsed.filter().clone(),
            sort: parsed.sort().clone(),
            projection: parsed.projection().clone(),
            index_key_patterns: indexes.to_vec(),
        };
        let mut entries = self.entries.lock().unwrap();
        entries.insert(query.shape_key().clone(), entry);
    }

    /// Removes the hint for the query's shape; absent entries are not an
    /// error.
    pub fn remove_allowed_indices(&self, query: &CanonicalQuery) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(query.shape_key());
    }

    /// Drops every hint.
    pub fn clear_allowed_indices(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
    }

    /// Clones of every stored hint, owned by the caller.
    pub fn get_all_allowed_indices(&self) -> Vec<AllowedIndexEntry> {
        let entries = self.entries.lock().unwrap();
        entries.values().cloned().collect()
    }

    /// The allowed key patterns for the query's shape, if a hint is pinned.
    pub fn allowed_indices(&self, query: &CanonicalQuery) -> Option<AllowedIndices> {
        let entries = self.entries.lock().unwrap();
        entries.get(query.shape_key()).map(|e| AllowedIndices {
            index_key_patterns: e.index_key_patterns.clone(),
        })
    }
}

/// Retains only the catalog entries whose key pattern matches one of the
/// allowed patterns. The planner applies this before enumeration when a
/// hint is pinned for the shape.
pub fn filter_allowed_index_entries(
    allowed: &AllowedIndices,
    index_entries: &mut Vec<IndexEntry>,
) {
    index_entries.retain(|entry| {
        allowed
            .index_key_patterns
            .iter()
            .any(|pattern| ordered_object_eq(&entry.key_pattern, pattern))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canonicalize(filter: Value) -> CanonicalQuery {
        CanonicalQuery::from_parts("test.c", filter, json!({}), json!({})).unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let settings = QuerySettings::new();
        let query = canonicalize(json!({"a": 1}));

        assert!(settings.allowed_indices(&query).is_none());

        settings.set_allowed_indices(&query, &[json!({"a": 1})]);
        let allowed = settings.allowed_indices(&query).unwrap();
        assert_eq!(allowed.index_key_patterns, vec![json!({"a": 1})]);
    }

    #[test]
    fn test_replace_same_shape() {
        let settings = QuerySettings::new();
        // Same shape, different constants.
        let one = canonicalize(json!({"a": 1}));
        let two = canonicalize(json!({"a": 99}));

        settings.set_allowed_indices(&one, &[json!({"a": 1})]);
        settings.set_allowed_indices(&two, &[json!({"a": 1, "b": 1})]);

        let all = settings.get_all_allowed_indices();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].index_key_patterns, vec![json!({"a": 1, "b": 1})]);
    }

    #[test]
    fn test_remove_is_quiet_when_absent() {
        let settings = QuerySettings::new();
        let query = canonicalize(json!({"a": 1}));
        settings.remove_allowed_indices(&query);

        settings.set_allowed_indices(&query, &[json!({"a": 1})]);
        settings.remove_allowed_indices(&query);
        assert!(settings.get_all_allowed_indices().is_empty());
    }

    #[test]
    fn test_clear() {
        let settings = QuerySettings::new();
        settings.set_allowed_indices(&canonicalize(json!({"a": 1})), &[json!({"a": 1})]);
        settings.set_allowed_indices(&canonicalize(json!({"b": 1})), &[json!({"b": 1})]);
        assert_eq!(settings.get_all_allowed_indices().len(), 2);

        settings.clear_allowed_indices();
        assert!(settings.get_all_allowed_indices().is_empty());
    }

    #[test]
    fn test_entry_documents_preserved() {
        let settings = QuerySettings::new();
        let query = CanonicalQuery::from_parts(
            "test.c",
            json!({"a": 1, "b": 1}),
            json!({"a": -1}),
            json!({"_id": 0, "a": 1}),
        )
        .unwrap();
        settings.set_allowed_indices(&query, &[json!({"a": 1})]);

        let all = settings.get_all_allowed_indices();
        assert_eq!(all[0].query, json!({"a": 1, "b": 1}));
        assert_eq!(all[0].sort, json!({"a": -1}));
        assert_eq!(all[0].projection, json!({"_id": 0, "a": 1}));
    }

    #[test]
    fn test_filter_allowed_index_entries() {
        let allowed = AllowedIndices {
            index_key_patterns: vec![json!({"a": 1, "b": 1})],
        };
        let mut entries = vec![
            IndexEntry::new(json!({"a": 1}), "a_1"),
            IndexEntry::new(json!({"a": 1, "b": 1}), "a_1_b_1"),
            // Same fields, different order: not the same index.
            IndexEntry::new(json!({"b": 1, "a": 1}), "b_1_a_1"),
        ];
        filter_allowed_index_entries(&allowed, &mut entries);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a_1_b_1");
    }
}
