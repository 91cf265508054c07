//! Bounded query history
//!
//! Newest first, deduplicated by exact query text, capped, and written back
//! to [`Storage`] after every change. Storage problems never reach the
//! caller: unreadable history loads as empty and failed writes are logged.

pub mod storage;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::query::is_trivial_filter;
use crate::utils::time::now_millis;

pub use storage::{FileStorage, MemoryStorage, Storage};

/// Storage key of the persisted history
pub const HISTORY_KEY: &str = "query_history";

/// Default number of entries kept
pub const DEFAULT_CAPACITY: usize = 20;

/// One remembered query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHistoryItem {
    /// Filter text as typed
    pub query: String,

    /// Qualified collection name (`database.collection`)
    pub collection: String,

    /// Unix milliseconds
    pub timestamp: i64,
}

/// Persisted, bounded history of successful queries
pub struct HistoryStore {
    items: Vec<QueryHistoryItem>,
    capacity: usize,
    storage: Arc<dyn Storage>,
}

impl HistoryStore {
    /// Load history from `storage`
    ///
    /// # Arguments
    /// * `storage` - Backing store
    /// * `capacity` - Maximum entries kept
    ///
    /// # Returns
    /// * `Self` - Store with the persisted entries, or empty when they are
    ///   missing or unreadable
    pub fn load(storage: Arc<dyn Storage>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut items = match storage.load(HISTORY_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<QueryHistoryItem>>(&raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!("Ignoring corrupt query history: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Could not read query history: {}", e);
                Vec::new()
            }
        };
        let mut seen = HashSet::new();
        items.retain(|item| seen.insert(item.query.clone()));
        items.truncate(capacity);
        debug!("Loaded {} history entries", items.len());

        Self {
            items,
            capacity,
            storage,
        }
    }

    /// Remember `query` run against `collection`
    ///
    /// Empty and `{}` filters are ignored. An identical earlier entry is
    /// moved to the front instead of duplicated.
    ///
    /// # Returns
    /// * `bool` - Whether the history changed
    pub fn record(&mut self, query: &str, collection: &str) -> bool {
        let query = query.trim();
        if is_trivial_filter(query) {
            return false;
        }

        self.items.retain(|item| item.query != query);
        self.items.insert(
            0,
            QueryHistoryItem {
                query: query.to_string(),
                collection: collection.to_string(),
                timestamp: now_millis(),
            },
        );
        self.items.truncate(self.capacity);
        self.persist();
        true
    }

    /// Entries, newest first
    pub fn items(&self) -> &[QueryHistoryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Forget every entry
    pub fn clear(&mut self) {
        self.items.clear();
        self.persist();
    }

    fn persist(&self) {
        let raw = match serde_json::to_string(&self.items) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not serialize query history: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.save(HISTORY_KEY, &raw) {
            warn!("Could not save query history: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (HistoryStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (HistoryStore::load(storage.clone(), DEFAULT_CAPACITY), storage)
    }

    #[test]
    fn test_record_prepends() {
        let (mut history, _) = store();
        assert!(history.record("{ a: 1 }", "shop.orders"));
        assert!(history.record("{ b: 2 }", "shop.orders"));
        let queries: Vec<&str> = history.items().iter().map(|i| i.query.as_str()).collect();
        assert_eq!(queries, vec!["{ b: 2 }", "{ a: 1 }"]);
    }

    #[test]
    fn test_trivial_filters_are_skipped() {
        let (mut history, _) = store();
        assert!(!history.record("", "shop.orders"));
        assert!(!history.record("{ }", "shop.orders"));
        assert!(history.is_empty());
    }

    #[test]
    fn test_duplicates_move_to_front() {
        let (mut history, _) = store();
        history.record("{ a: 1 }", "shop.orders");
        history.record("{ b: 2 }", "shop.orders");
        history.record("{ a: 1 }", "shop.users");
        assert_eq!(history.len(), 2);
        assert_eq!(history.items()[0].query, "{ a: 1 }");
        assert_eq!(history.items()[0].collection, "shop.users");
    }

    #[test]
    fn test_capacity() {
        let (mut history, _) = store();
        for i in 0..25 {
            history.record(&format!("{{ n: {i} }}"), "shop.orders");
        }
        assert_eq!(history.len(), DEFAULT_CAPACITY);
        assert_eq!(history.items()[0].query, "{ n: 24 }");
        assert_eq!(history.items()[19].query, "{ n: 5 }");
    }

    #[test]
    fn test_persists_and_reloads() {
        let (mut history, storage) = store();
        history.record("{ a: 1 }", "shop.orders");

        let raw = storage.load(HISTORY_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["query"], "{ a: 1 }");
        assert_eq!(value[0]["collection"], "shop.orders");
        assert!(value[0]["timestamp"].is_i64());

        let reloaded = HistoryStore::load(storage, DEFAULT_CAPACITY);
        assert_eq!(reloaded.items(), history.items());
    }

    #[test]
    fn test_load_drops_duplicate_queries() {
        let raw = r#"[
            {"query": "{ a: 1 }", "collection": "shop.orders", "timestamp": 3},
            {"query": "{ b: 2 }", "collection": "shop.orders", "timestamp": 2},
            {"query": "{ a: 1 }", "collection": "shop.users", "timestamp": 1}
        ]"#;
        let storage = Arc::new(MemoryStorage::with_value(HISTORY_KEY, raw));
        let history = HistoryStore::load(storage, DEFAULT_CAPACITY);

        let queries: Vec<_> = history.items().iter().map(|i| i.query.as_str()).collect();
        assert_eq!(queries, vec!["{ a: 1 }", "{ b: 2 }"]);
        assert_eq!(history.items()[0].collection, "shop.orders");
    }

    #[test]
    fn test_corrupt_storage_loads_empty() {
        let storage = Arc::new(MemoryStorage::with_value(HISTORY_KEY, "{not json"));
        let history = HistoryStore::load(storage, DEFAULT_CAPACITY);
        assert!(history.is_empty());
    }

    #[test]
    fn test_clear() {
        let (mut history, storage) = store();
        history.record("{ a: 1 }", "shop.orders");
        history.clear();
        assert!(history.is_empty());
        assert_eq!(storage.load(HISTORY_KEY).unwrap().as_deref(), Some("[]"));
    }
}
