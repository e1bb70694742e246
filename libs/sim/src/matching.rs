//! Contracts of the record-matching collaborator
//!
//! Scoring is implemented elsewhere; the engine only invokes it and acts on
//! the classifications it returns.

use crate::{
    models::{MatchConfiguration, MatchResult, Record},
    Result,
};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait RecordMatcher: Send + Sync {
    /// Score `record` against stored records using one configuration, never
    /// returning a candidate whose key is in `exclude`.
    async fn match_records(
        &self,
        record: &Record,
        configuration: &MatchConfiguration,
        exclude: &[Uuid],
    ) -> Result<Vec<MatchResult>>;
}

#[async_trait]
pub trait MatchConfigurationProvider: Send + Sync {
    /// Configurations that apply to a resource type. Callers still check `active`.
    async fn active_configurations(&self, resource_type: &str) -> Result<Vec<MatchConfiguration>>;
}
