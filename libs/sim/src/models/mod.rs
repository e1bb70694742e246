//! Domain models shared by the interceptors, the match runner and the store

mod bundle;
mod matching;
mod record;

pub use bundle::{BatchOperation, Bundle, BundleData, BundleItem};
pub use matching::{
    DetectionSummary, MatchClassification, MatchConfiguration, MatchResult, MergeResult,
    MergeStatus, ScoredRecord, AUTO_MATCH_TAG,
};
pub use record::{
    EntityRelationship, Identifier, Mergeable, Principal, Record, RecordStatus,
    RelationshipKind,
};

use serde::{Deserialize, Serialize};

/// How a bundle is committed by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionMode {
    Commit,
    Rollback,
}

/// How deleted data is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMode {
    Logical,
    Permanent,
}

/// How much of a record is hydrated when it is loaded.
///
/// `Quick` skips relationship hydration and is what bulk re-detection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadMode {
    Full,
    Quick,
}
