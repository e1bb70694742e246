//! Record store trait definition

use crate::{
    models::{
        Bundle, DeleteMode, EntityRelationship, LoadMode, Principal, Record, RelationshipKind,
        TransactionMode,
    },
    Result,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

/// Abstract interface for the transactional persistence layer
///
/// `persist` is the raw write path: implementations must not raise lifecycle
/// notifications for it, since the interceptors use it to commit the bundles
/// they build from inside those notifications.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load a record by key
    async fn get(&self, resource_type: &str, key: Uuid) -> Result<Option<Record>>;

    /// Commit a bundle atomically and return the persisted items
    async fn persist(
        &self,
        bundle: Bundle,
        mode: TransactionMode,
        principal: &Principal,
    ) -> Result<Bundle>;

    /// Query relationship edges
    async fn query_relationships(
        &self,
        filter: &RelationshipFilter,
        principal: &Principal,
    ) -> Result<Vec<EntityRelationship>>;

    /// Count records of a type that are not obsolete or nullified
    async fn count_active(&self, resource_type: &str) -> Result<u64>;

    /// Stream every active record of a type
    async fn stream_active<'a>(
        &'a self,
        resource_type: &'a str,
        mode: LoadMode,
    ) -> Result<BoxStream<'a, Result<Record>>>;

    /// Bulk-delete every edge matching `filter`, returning how many were removed
    async fn purge_relationships(
        &self,
        filter: &RelationshipFilter,
        mode: DeleteMode,
        principal: &Principal,
    ) -> Result<u64>;
}

/// Predicate over relationship edges. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipFilter {
    pub resource_type: Option<String>,
    pub kind: Option<RelationshipKind>,
    pub source: Option<Uuid>,
    pub target: Option<Uuid>,
    /// Matches edges with this key at either end
    pub involving: Option<Uuid>,
    pub negated: Option<bool>,
}

impl RelationshipFilter {
    /// Duplicate edges of one resource type
    pub fn duplicates(resource_type: &str) -> Self {
        Self {
            resource_type: Some(resource_type.to_string()),
            kind: Some(RelationshipKind::Duplicate),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: RelationshipKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn source(mut self, key: Uuid) -> Self {
        self.source = Some(key);
        self
    }

    pub fn target(mut self, key: Uuid) -> Self {
        self.target = Some(key);
        self
    }

    pub fn involving(mut self, key: Uuid) -> Self {
        self.involving = Some(key);
        self
    }

    pub fn negated(mut self, negated: bool) -> Self {
        self.negated = Some(negated);
        self
    }

    pub fn matches(&self, rel: &EntityRelationship) -> bool {
        self.resource_type
            .as_deref()
            .map_or(true, |t| rel.resource_type == t)
            && self.kind.map_or(true, |k| rel.kind == k)
            && self.source.map_or(true, |s| rel.source == s)
            && self.target.map_or(true, |t| rel.target == t)
            && self.involving.map_or(true, |k| rel.involves(k))
            && self.negated.map_or(true, |n| rel.negated == n)
    }
}
