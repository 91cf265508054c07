//! Automatic projection for wide collections
//!
//! When a collection has more top-level fields than the configured threshold,
//! the first simple query without a projection of a collection session gets
//! one built from the most frequent fields. The marker records whether that
//! happened so it is applied at most once and never fights the user.

use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborator::DocumentProfile;
use crate::config::QueryConfig;
use crate::query::FindQuery;
use crate::schema::CollectionSchema;

/// Auto-projection marker of a collection session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoProjectionState {
    /// Nothing applied yet
    #[default]
    Empty,
    /// Projection (as JSON) embedded in the query text
    Applied(String),
    /// User asked for all fields or removed the projection
    OptedOut,
}

/// Chooses automatic projections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionPlanner {
    enabled: bool,
    field_threshold: usize,
    max_fields: usize,
}

impl ProjectionPlanner {
    pub fn new(enabled: bool, field_threshold: usize, max_fields: usize) -> Self {
        Self {
            enabled,
            field_threshold,
            max_fields,
        }
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        Self::new(
            config.auto_projection,
            config.auto_projection_field_threshold,
            config.auto_projection_max_fields,
        )
    }

    /// Bring the marker in line with the query the user is about to run
    ///
    /// An applied projection that no longer appears verbatim in the query
    /// means the user removed or replaced it; the session is then opted out.
    pub fn reconcile(state: &AutoProjectionState, find: &FindQuery) -> AutoProjectionState {
        match state {
            AutoProjectionState::Applied(applied) => {
                let current = find.projection.as_ref().map(projection_json);
                if current.as_deref() == Some(applied.as_str()) {
                    state.clone()
                } else {
                    debug!("Applied projection was edited out, opting out");
                    AutoProjectionState::OptedOut
                }
            }
            other => other.clone(),
        }
    }

    /// Projection to apply to `find`, if any
    ///
    /// # Arguments
    /// * `state` - Current marker (already reconciled)
    /// * `find` - Query about to run
    /// * `schema` - Observed fields of the collection
    /// * `profile` - Collection profile
    ///
    /// # Returns
    /// * `Option<Document>` - `{ field: 1, ... }` when the collection is wide
    pub fn plan(
        &self,
        state: &AutoProjectionState,
        find: &FindQuery,
        schema: Option<&CollectionSchema>,
        profile: Option<&DocumentProfile>,
    ) -> Option<Document> {
        if !self.enabled || *state != AutoProjectionState::Empty || find.has_projection() {
            return None;
        }

        let schema = schema.filter(|s| s.top_level_field_count() > 0);
        let field_count = match (schema, profile) {
            (Some(schema), _) => schema.top_level_field_count(),
            (None, Some(profile)) => profile.field_count,
            (None, None) => return None,
        };
        if field_count <= self.field_threshold {
            return None;
        }

        let mut fields: Vec<String> = schema
            .map(|s| {
                s.ranked_top_level_fields()
                    .into_iter()
                    .map(|(name, _)| name)
                    .filter(|name| name != "_id")
                    .take(self.max_fields)
                    .collect()
            })
            .unwrap_or_default();

        if fields.is_empty()
            && let Some(profile) = profile
        {
            fields = profile
                .top_fields
                .iter()
                .filter(|name| name.as_str() != "_id")
                .take(self.max_fields)
                .cloned()
                .collect();
        }

        if fields.is_empty() {
            return None;
        }

        debug!(
            "Auto-projection of {} fields for {} known fields",
            fields.len(),
            field_count
        );
        let mut projection = Document::new();
        for field in fields {
            projection.insert(field, 1);
        }
        Some(projection)
    }
}

/// Canonical JSON form of a projection, used as the applied marker
pub fn projection_json(projection: &Document) -> String {
    Bson::Document(projection.clone())
        .into_relaxed_extjson()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryClassifier, QueryKind};
    use mongodb::bson::doc;

    fn find(text: &str) -> FindQuery {
        match QueryClassifier::classify(text) {
            QueryKind::Simple(find) => find,
            QueryKind::Complex => panic!("not simple: {text}"),
        }
    }

    fn wide_schema(fields: usize) -> CollectionSchema {
        let mut schema = CollectionSchema::default();
        for i in 0..fields {
            schema.fields.insert(format!("f{i:02}"), (fields - i) as u64);
        }
        schema.fields.insert("_id".to_string(), 1_000);
        schema.fields.insert("f00.nested".to_string(), 5);
        schema
    }

    fn planner() -> ProjectionPlanner {
        ProjectionPlanner::from_config(&QueryConfig::default())
    }

    #[test]
    fn test_wide_schema_gets_top_fields() {
        let projection = planner()
            .plan(&AutoProjectionState::Empty, &find("{}"), Some(&wide_schema(40)), None)
            .unwrap();
        assert_eq!(projection.len(), 15);
        assert!(!projection.contains_key("_id"));
        assert_eq!(projection.keys().next().map(String::as_str), Some("f00"));
        assert!(projection.contains_key("f14"));
        assert!(!projection.contains_key("f15"));
    }

    #[test]
    fn test_narrow_schema_is_left_alone() {
        let schema = wide_schema(29);
        let plan = planner().plan(&AutoProjectionState::Empty, &find("{}"), Some(&schema), None);
        assert!(plan.is_none());
    }

    #[test]
    fn test_profile_fallback() {
        let profile = DocumentProfile {
            avg_doc_size_bytes: 100.0,
            field_count: 31,
            top_fields: vec!["_id".into(), "name".into(), "email".into()],
        };
        let projection = planner()
            .plan(&AutoProjectionState::Empty, &find("{}"), None, Some(&profile))
            .unwrap();
        assert_eq!(projection, doc! { "name": 1, "email": 1 });
    }

    #[test]
    fn test_user_projection_or_marker_blocks_planning() {
        let schema = wide_schema(40);
        let planner = planner();
        let projected = find("db.c.find({}, { a: 1 })");
        assert!(
            planner
                .plan(&AutoProjectionState::Empty, &projected, Some(&schema), None)
                .is_none()
        );
        assert!(
            planner
                .plan(&AutoProjectionState::OptedOut, &find("{}"), Some(&schema), None)
                .is_none()
        );
        assert!(
            ProjectionPlanner::new(false, 30, 15)
                .plan(&AutoProjectionState::Empty, &find("{}"), Some(&schema), None)
                .is_none()
        );
    }

    #[test]
    fn test_reconcile_keeps_intact_projection() {
        let projection = doc! { "name": 1 };
        let text = find("{ a: 1 }").with_projection("users", &projection);
        let state = AutoProjectionState::Applied(projection_json(&projection));
        assert_eq!(ProjectionPlanner::reconcile(&state, &find(&text)), state);
    }

    #[test]
    fn test_reconcile_opts_out_when_projection_removed() {
        let state = AutoProjectionState::Applied(projection_json(&doc! { "name": 1 }));
        assert_eq!(
            ProjectionPlanner::reconcile(&state, &find("db.users.find({ a: 1 })")),
            AutoProjectionState::OptedOut
        );
        assert_eq!(
            ProjectionPlanner::reconcile(&AutoProjectionState::Empty, &find("{}")),
            AutoProjectionState::Empty
        );
    }
}
