//! Periodic re-detection of merge candidates

use super::Job;
use crate::{models::Principal, services::MergeService, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub const MATCH_JOB_ID: &str = "sim-match-candidates";

/// Re-runs bulk candidate detection for every managed resource type
pub struct MatchCandidatesJob {
    services: Vec<Arc<dyn MergeService>>,
    clear_existing: bool,
}

impl MatchCandidatesJob {
    pub fn new(services: Vec<Arc<dyn MergeService>>, clear_existing: bool) -> Self {
        Self {
            services,
            clear_existing,
        }
    }
}

#[async_trait]
impl Job for MatchCandidatesJob {
    fn id(&self) -> &str {
        MATCH_JOB_ID
    }

    fn name(&self) -> &str {
        "Re-detect merge candidates"
    }

    async fn run(&self) -> Result<()> {
        let system = Principal::system();
        for service in &self.services {
            if self.clear_existing {
                let cleared = service.clear_global_merge_candidates(&system).await?;
                tracing::debug!(resource_type = service.resource_type(), cleared, "Cleared candidates before detection");
            }
            let summary = service.detect_global_merge_candidates(&system).await?;
            tracing::info!(
                resource_type = %summary.resource_type,
                processed = summary.processed,
                "Candidate detection finished"
            );
        }
        Ok(())
    }
}
