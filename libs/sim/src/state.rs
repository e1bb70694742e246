//! Collaborators shared by every interceptor

use crate::{
    db::RecordStore,
    hooks::{BusinessRules, HookRegistry},
    jobs::JobManager,
    matching::{MatchConfigurationProvider, RecordMatcher},
    policy::PolicyEnforcement,
};
use std::sync::Arc;

/// Handles to the external services the engine consumes
#[derive(Clone)]
pub struct SimState {
    pub store: Arc<dyn RecordStore>,
    pub hooks: Arc<dyn HookRegistry>,
    pub matcher: Arc<dyn RecordMatcher>,
    pub configurations: Arc<dyn MatchConfigurationProvider>,
    pub policy: Arc<dyn PolicyEnforcement>,
    pub rules: Arc<dyn BusinessRules>,
    pub jobs: Arc<dyn JobManager>,
}

/// Bulk-session sizing derived from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSettings {
    pub single_node: bool,
    /// Explicit worker count; derived from the deployment shape when unset
    pub match_workers: Option<usize>,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            single_node: true,
            match_workers: None,
        }
    }
}

impl MatchSettings {
    pub fn worker_count(&self) -> usize {
        if let Some(workers) = self.match_workers {
            return workers.max(1);
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        crate::services::runner::recommended_worker_count(self.single_node, cpus)
    }
}
