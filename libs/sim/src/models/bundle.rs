use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityRelationship, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BundleData {
    Record(Record),
    Relationship(EntityRelationship),
}

impl BundleData {
    pub fn key(&self) -> Option<Uuid> {
        match self {
            BundleData::Record(r) => r.key,
            BundleData::Relationship(r) => r.key,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut Record> {
        match self {
            BundleData::Record(r) => Some(r),
            BundleData::Relationship(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleItem {
    pub operation: BatchOperation,
    pub data: BundleData,
}

impl BundleItem {
    pub fn insert_record(record: Record) -> Self {
        Self {
            operation: BatchOperation::Insert,
            data: BundleData::Record(record),
        }
    }

    pub fn update_record(record: Record) -> Self {
        Self {
            operation: BatchOperation::Update,
            data: BundleData::Record(record),
        }
    }

    pub fn delete_record(record: Record) -> Self {
        Self {
            operation: BatchOperation::Delete,
            data: BundleData::Record(record),
        }
    }

    pub fn insert_relationship(relationship: EntityRelationship) -> Self {
        Self {
            operation: BatchOperation::Insert,
            data: BundleData::Relationship(relationship),
        }
    }

    pub fn delete_relationship(relationship: EntityRelationship) -> Self {
        Self {
            operation: BatchOperation::Delete,
            data: BundleData::Relationship(relationship),
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match &self.data {
            BundleData::Record(r) => Some(r),
            BundleData::Relationship(_) => None,
        }
    }

    pub fn relationship(&self) -> Option<&EntityRelationship> {
        match &self.data {
            BundleData::Relationship(r) => Some(r),
            BundleData::Record(_) => None,
        }
    }

    fn same_subject(&self, other: &BundleItem) -> bool {
        let same_kind = matches!(
            (&self.data, &other.data),
            (BundleData::Record(_), BundleData::Record(_))
                | (BundleData::Relationship(_), BundleData::Relationship(_))
        );
        same_kind && self.data.key().is_some() && self.data.key() == other.data.key()
    }
}

/// An ordered, atomic unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub items: Vec<BundleItem>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<BundleItem>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn push(&mut self, item: BundleItem) {
        self.items.push(item);
    }

    /// Adds `item`, or folds it into an existing item about the same record or
    /// relationship. The existing operation is kept and the newer data wins, so
    /// a record inserted by the caller and then obsoleted by a merge is still
    /// inserted, but in its obsoleted form.
    pub fn upsert(&mut self, item: BundleItem) {
        match self.items.iter_mut().find(|i| i.same_subject(&item)) {
            Some(existing) => {
                // An insert followed by a delete of the same edge cancels out.
                if existing.operation == BatchOperation::Insert
                    && item.operation == BatchOperation::Delete
                    && existing.relationship().is_some()
                {
                    let key = item.data.key();
                    self.items
                        .retain(|i| !(i.relationship().is_some() && i.data.key() == key));
                } else {
                    existing.data = item.data;
                }
            }
            None => self.items.push(item),
        }
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = BundleItem>) {
        for item in items {
            self.upsert(item);
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.items.iter().filter_map(|i| i.record())
    }

    pub fn relationships(&self) -> impl Iterator<Item = &EntityRelationship> {
        self.items.iter().filter_map(|i| i.relationship())
    }

    pub fn find_record(&self, key: Uuid) -> Option<&Record> {
        self.records().find(|r| r.key == Some(key))
    }
}
