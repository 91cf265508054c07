//! In-process schema cache
//!
//! Keeps two maps keyed by collection identity:
//! - observed field paths with occurrence counts, merged from query results
//! - document profiles fetched through the collaborator
//!
//! Both maps are last-write-wins and never held across an await.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::collaborator::{Collaborator, CollectionKey, DocumentProfile};

/// Field statistics observed for one collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSchema {
    /// Dotted field path to the number of documents it appeared in
    pub fields: BTreeMap<String, u64>,

    /// Documents merged so far
    pub documents_seen: u64,
}

impl CollectionSchema {
    /// Every known field path, including nested ones
    pub fn field_names(&self) -> BTreeSet<String> {
        self.fields.keys().cloned().collect()
    }

    /// Top-level fields ranked by occurrence, most frequent first, ties by name
    pub fn ranked_top_level_fields(&self) -> Vec<(String, u64)> {
        let mut ranked: Vec<(String, u64)> = self
            .fields
            .iter()
            .filter(|(path, _)| !path.contains('.'))
            .map(|(path, count)| (path.clone(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Number of distinct top-level fields
    pub fn top_level_field_count(&self) -> usize {
        self.fields.keys().filter(|path| !path.contains('.')).count()
    }
}

/// Field paths and occurrence counts extracted from one batch of documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldObservations {
    pub fields: BTreeMap<String, u64>,
    pub documents: u64,
}

/// Shared cache of schemas and profiles
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemas: RwLock<HashMap<CollectionKey, CollectionSchema>>,
    profiles: RwLock<HashMap<CollectionKey, DocumentProfile>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known field paths for a collection, `None` when nothing was observed yet
    pub fn field_names(&self, key: &CollectionKey) -> Option<BTreeSet<String>> {
        read(&self.schemas).get(key).map(CollectionSchema::field_names)
    }

    /// Cached schema for a collection
    pub fn cached_schema(&self, key: &CollectionKey) -> Option<CollectionSchema> {
        read(&self.schemas).get(key).cloned()
    }

    /// Merge observed field paths into the collection's schema
    pub fn merge_field_names(&self, key: &CollectionKey, observations: &FieldObservations) {
        if observations.documents == 0 {
            return;
        }
        let mut schemas = write(&self.schemas);
        let schema = schemas.entry(key.clone()).or_default();
        for (path, count) in &observations.fields {
            *schema.fields.entry(path.clone()).or_default() += count;
        }
        schema.documents_seen += observations.documents;
        debug!(
            "Merged {} field paths into {} ({} known)",
            observations.fields.len(),
            key,
            schema.fields.len()
        );
    }

    /// Cached profile for a collection
    pub fn collection_profile(&self, key: &CollectionKey) -> Option<DocumentProfile> {
        read(&self.profiles).get(key).cloned()
    }

    /// Store a profile, replacing any previous one
    pub fn store_profile(&self, key: &CollectionKey, profile: DocumentProfile) {
        write(&self.profiles).insert(key.clone(), profile);
    }

    /// Cached profile, fetching it through the collaborator on a miss
    ///
    /// # Arguments
    /// * `collaborator` - Source of profiles
    /// * `key` - Collection identity
    ///
    /// # Returns
    /// * `Option<DocumentProfile>` - `None` when the profile is unavailable
    pub async fn fetch_collection_profile(
        &self,
        collaborator: &dyn Collaborator,
        key: &CollectionKey,
    ) -> Option<DocumentProfile> {
        if let Some(profile) = self.collection_profile(key) {
            return Some(profile);
        }

        match collaborator.get_collection_profile(key).await {
            Ok(profile) => {
                self.store_profile(key, profile.clone());
                Some(profile)
            }
            Err(e) => {
                warn!("Profile unavailable for {}: {}", key, e);
                None
            }
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CollectionKey {
        CollectionKey::new("c1", "shop", "orders")
    }

    fn observations(paths: &[(&str, u64)], documents: u64) -> FieldObservations {
        FieldObservations {
            fields: paths.iter().map(|(p, c)| (p.to_string(), *c)).collect(),
            documents,
        }
    }

    #[test]
    fn test_no_schema_until_merged() {
        let cache = SchemaCache::new();
        assert!(cache.field_names(&key()).is_none());
        cache.merge_field_names(&key(), &FieldObservations::default());
        assert!(cache.cached_schema(&key()).is_none());
    }

    #[test]
    fn test_merge_accumulates_counts() {
        let cache = SchemaCache::new();
        cache.merge_field_names(&key(), &observations(&[("a", 2), ("b", 1), ("b.c", 1)], 2));
        cache.merge_field_names(&key(), &observations(&[("b", 3)], 3));

        let schema = cache.cached_schema(&key()).unwrap();
        assert_eq!(schema.documents_seen, 5);
        assert_eq!(schema.fields["b"], 4);
        assert_eq!(schema.top_level_field_count(), 2);
        assert_eq!(
            schema.ranked_top_level_fields(),
            vec![("b".to_string(), 4), ("a".to_string(), 2)]
        );
        assert!(cache.field_names(&key()).unwrap().contains("b.c"));
    }

    #[test]
    fn test_ranking_breaks_ties_by_name() {
        let cache = SchemaCache::new();
        cache.merge_field_names(&key(), &observations(&[("z", 1), ("m", 1), ("a", 1)], 1));
        let ranked: Vec<String> = cache
            .cached_schema(&key())
            .unwrap()
            .ranked_top_level_fields()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(ranked, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_profiles_are_keyed_by_collection() {
        let cache = SchemaCache::new();
        let profile = DocumentProfile {
            avg_doc_size_bytes: 120.0,
            field_count: 4,
            top_fields: vec![],
        };
        cache.store_profile(&key(), profile.clone());
        assert_eq!(cache.collection_profile(&key()), Some(profile));
        assert!(cache.collection_profile(&key().with_collection("users")).is_none());
    }
}
