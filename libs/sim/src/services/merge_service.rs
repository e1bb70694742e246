//! Public merge surface of one managed resource type

use crate::{
    models::{DetectionSummary, EntityRelationship, MergeResult, Principal, Record, ScoredRecord},
    Result,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Merge, ignore and candidate-detection operations for one resource type.
///
/// REST endpoints and jobs consume interceptors through this trait.
#[async_trait]
pub trait MergeService: Send + Sync {
    fn resource_type(&self) -> &str;

    /// Merge each duplicate into `survivor_key`. Duplicates end nullified.
    async fn merge(
        &self,
        survivor_key: Uuid,
        duplicate_keys: &[Uuid],
        principal: &Principal,
    ) -> Result<MergeResult>;

    /// Always fails: single-instance merges are destructive.
    async fn unmerge(
        &self,
        master_key: Uuid,
        unmerge_key: Uuid,
        principal: &Principal,
    ) -> Result<MergeResult>;

    /// Record that `false_positive_keys` are not duplicates of `master_key`.
    async fn ignore(
        &self,
        master_key: Uuid,
        false_positive_keys: &[Uuid],
        principal: &Principal,
    ) -> Result<Record>;

    /// Remove ignore markers so the pairs can surface as candidates again.
    async fn unignore(
        &self,
        master_key: Uuid,
        ignored_keys: &[Uuid],
        principal: &Principal,
    ) -> Result<Record>;

    async fn get_merge_candidate_keys(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<Uuid>>;

    async fn get_merge_candidates(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<ScoredRecord>>;

    async fn get_ignored_keys(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<Uuid>>;

    async fn get_ignored(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<Record>>;

    /// Every candidate edge of this resource type.
    async fn get_global_merge_candidates(&self, principal: &Principal) -> Result<Vec<EntityRelationship>>;

    /// Re-run matching for one record and return its candidate keys.
    async fn detect_merge_candidates(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<Uuid>>;

    /// Re-run matching for every active record of this type.
    async fn detect_global_merge_candidates(&self, principal: &Principal) -> Result<DetectionSummary>;

    async fn clear_global_merge_candidates(&self, principal: &Principal) -> Result<u64>;

    async fn clear_global_ignore_flags(&self, principal: &Principal) -> Result<u64>;

    async fn clear_merge_candidates(&self, master_key: Uuid, principal: &Principal) -> Result<u64>;

    async fn clear_ignore_flags(&self, master_key: Uuid, principal: &Principal) -> Result<u64>;

    /// Delete candidate edges (and ignore markers when `include_verified`),
    /// for one record or the whole type. `links_only` has no extra effect
    /// since the edges are the only merge state kept per record.
    async fn reset(
        &self,
        master_key: Option<Uuid>,
        include_verified: bool,
        links_only: bool,
        principal: &Principal,
    ) -> Result<u64>;
}
