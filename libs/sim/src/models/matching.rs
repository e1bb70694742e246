use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::Record;

/// Classification tag that allows a configuration to merge without review.
pub const AUTO_MATCH_TAG: &str = "AutoMatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchClassification {
    Match,
    Probable,
    NonMatch,
}

/// A record-matching configuration as published by the matching collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfiguration {
    pub id: String,
    pub resource_type: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl MatchConfiguration {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            active: true,
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn is_auto_match(&self) -> bool {
        self.tags
            .get(AUTO_MATCH_TAG)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

/// One scored candidate produced by the matching collaborator. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate: Record,
    pub classification: MatchClassification,
    pub strength: f64,
    pub configuration_id: String,
}

impl MatchResult {
    pub fn candidate_key(&self) -> Option<Uuid> {
        self.candidate.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStatus {
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub status: MergeStatus,
    pub survivors: Vec<Uuid>,
    pub replaced: Vec<Uuid>,
}

/// A merge candidate together with the strength of its duplicate edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub strength: f64,
}

/// Outcome of a bulk re-detection run.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSummary {
    pub resource_type: String,
    pub streamed: u64,
    pub processed: u64,
    pub elapsed: Duration,
}

impl DetectionSummary {
    /// Records processed per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            return self.processed as f64;
        }
        self.processed as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_match_tag_is_case_insensitive() {
        let config = MatchConfiguration::new("deterministic", "Patient").with_tag(AUTO_MATCH_TAG, "TRUE");
        assert!(config.is_auto_match());

        let config = MatchConfiguration::new("probabilistic", "Patient").with_tag(AUTO_MATCH_TAG, "false");
        assert!(!config.is_auto_match());

        assert!(!MatchConfiguration::new("untagged", "Patient").is_auto_match());
    }
}
