use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    New,
    Active,
    /// Superseded by another record (the subsumed side of a merge).
    Obsolete,
    /// Explicitly invalid.
    Nullified,
}

impl RecordStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RecordStatus::New | RecordStatus::Active)
    }
}

/// An identifier issued by an identity domain.
///
/// Two identifiers are the same when domain, value and check digit all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub domain: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_digit: Option<String>,
}

impl Identifier {
    pub fn new(domain: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            value: value.into(),
            check_digit: None,
        }
    }

    pub fn with_check_digit(mut self, check_digit: impl Into<String>) -> Self {
        self.check_digit = Some(check_digit.into());
        self
    }
}

/// A clinical record (patient, person, act, ...) as seen by the merge engine.
///
/// The engine only edits status, identifiers and relationships. `data` carries
/// the demographic/clinical payload the matching collaborator scores against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: Option<Uuid>,
    pub resource_type: String,
    pub status: RecordStatus,
    #[serde(default)]
    pub class_concept: Option<Uuid>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Record {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            key: None,
            resource_type: resource_type.into(),
            status: RecordStatus::New,
            class_concept: None,
            version: 0,
            identifiers: Vec::new(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_key(mut self, key: Uuid) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifiers.push(identifier);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Returns the key, assigning a fresh one first if the record has none.
    pub fn ensure_key(&mut self) -> Uuid {
        *self.key.get_or_insert_with(Uuid::new_v4)
    }
}

/// The accessors the merge algorithms need from a record.
pub trait Mergeable {
    fn key(&self) -> Option<Uuid>;
    fn status(&self) -> RecordStatus;
    fn set_status(&mut self, status: RecordStatus);
    fn class_concept(&self) -> Option<Uuid>;
    fn version(&self) -> u32;
    fn identifiers(&self) -> &[Identifier];
    fn identifiers_mut(&mut self) -> &mut Vec<Identifier>;
}

impl Mergeable for Record {
    fn key(&self) -> Option<Uuid> {
        self.key
    }

    fn status(&self) -> RecordStatus {
        self.status
    }

    fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }

    fn class_concept(&self) -> Option<Uuid> {
        self.class_concept
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    fn identifiers_mut(&mut self) -> &mut Vec<Identifier> {
        &mut self.identifiers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// Scored candidate duplicate, or a confirmed non-duplicate when negated.
    Duplicate,
    /// Audit edge from a merge survivor to the record it subsumed.
    Replaces,
}

/// A directed edge between two records of the same resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub key: Option<Uuid>,
    pub resource_type: String,
    pub kind: RelationshipKind,
    pub source: Uuid,
    pub target: Uuid,
    pub strength: f64,
    #[serde(default)]
    pub negated: bool,
}

impl EntityRelationship {
    pub fn duplicate(resource_type: &str, source: Uuid, target: Uuid, strength: f64) -> Self {
        Self {
            key: Some(Uuid::new_v4()),
            resource_type: resource_type.to_string(),
            kind: RelationshipKind::Duplicate,
            source,
            target,
            strength,
            negated: false,
        }
    }

    pub fn ignored(resource_type: &str, source: Uuid, target: Uuid) -> Self {
        Self {
            negated: true,
            ..Self::duplicate(resource_type, source, target, 1.0)
        }
    }

    pub fn replaces(resource_type: &str, survivor: Uuid, subsumed: Uuid) -> Self {
        Self {
            kind: RelationshipKind::Replaces,
            ..Self::duplicate(resource_type, survivor, subsumed, 1.0)
        }
    }

    pub fn involves(&self, key: Uuid) -> bool {
        self.source == key || self.target == key
    }

    /// The end of the edge that is not `key`.
    pub fn other_end(&self, key: Uuid) -> Uuid {
        if self.source == key {
            self.target
        } else {
            self.source
        }
    }
}

/// The identity a write or query is performed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    #[serde(default)]
    pub is_system: bool,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_system: false,
        }
    }

    pub fn system() -> Self {
        Self {
            name: "SYSTEM".to_string(),
            is_system: true,
        }
    }
}
