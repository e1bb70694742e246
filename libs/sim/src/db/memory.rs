//! In-process `RecordStore` implementation
//!
//! Holds records and edges in memory and dispatches lifecycle hooks for client
//! writes. Primary use-case: embedding the engine without a database and
//! deterministic tests that need to observe exactly what was committed.

use crate::{
    db::{RecordStore, RelationshipFilter},
    hooks::{HookRegistry, HookSubscription, PersistenceHook, WriteDecision, BUNDLE_RESOURCE_TYPE},
    models::{
        BatchOperation, Bundle, BundleData, DeleteMode, EntityRelationship, LoadMode, Principal,
        Record, RecordStatus, TransactionMode,
    },
    Error, Result,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    records: HashMap<Uuid, Record>,
    relationships: HashMap<Uuid, EntityRelationship>,
}

struct Subscriber {
    subscription: HookSubscription,
    resource_type: String,
    hook: Arc<dyn PersistenceHook>,
}

/// In-memory store with atomic bundle commits and hook dispatch
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: RwLock<StoreState>,
    subscribers: Mutex<Vec<Subscriber>>,
    commits: AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bundles committed through `persist`
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Store a record directly, bypassing hooks
    pub async fn seed(&self, record: Record) -> Result<Record> {
        let principal = Principal::system();
        let persisted = self
            .persist(
                Bundle::from_items(vec![crate::models::BundleItem::insert_record(record)]),
                TransactionMode::Commit,
                &principal,
            )
            .await?;
        let record = persisted.records().next().cloned();
        record.ok_or_else(|| Error::Internal("Seeded bundle returned no record".to_string()))
    }

    /// Snapshot of a record regardless of status
    pub fn record(&self, key: Uuid) -> Result<Option<Record>> {
        Ok(self.state.read()?.records.get(&key).cloned())
    }

    /// Snapshot of every stored edge
    pub fn relationships(&self) -> Result<Vec<EntityRelationship>> {
        Ok(self.state.read()?.relationships.values().cloned().collect())
    }

    /// Create a record, giving subscribed hooks the chance to take over the write
    pub async fn insert(&self, mut record: Record, principal: &Principal) -> Result<Record> {
        for hook in self.hooks_for(&record.resource_type)? {
            if let WriteDecision::Handled(bundle) = hook.on_inserting(&mut record, principal).await? {
                return Ok(handled_record(&bundle, record));
            }
        }
        self.persist_single(crate::models::BundleItem::insert_record(record), principal)
            .await
    }

    /// Update a record, giving subscribed hooks the chance to take over the write
    pub async fn update(&self, mut record: Record, principal: &Principal) -> Result<Record> {
        for hook in self.hooks_for(&record.resource_type)? {
            if let WriteDecision::Handled(bundle) = hook.on_updating(&mut record, principal).await? {
                return Ok(handled_record(&bundle, record));
            }
        }
        self.persist_single(crate::models::BundleItem::update_record(record), principal)
            .await
    }

    /// Soft-delete a record, then notify subscribed hooks
    pub async fn delete(&self, resource_type: &str, key: Uuid, principal: &Principal) -> Result<Record> {
        let record = self
            .get(resource_type, key)
            .await?
            .ok_or_else(|| Error::not_found(resource_type, key))?;
        let deleted = self
            .persist_single(crate::models::BundleItem::delete_record(record), principal)
            .await?;
        for hook in self.hooks_for(resource_type)? {
            hook.on_deleted(&deleted, principal).await?;
        }
        Ok(deleted)
    }

    /// Commit a client bundle, giving bundle hooks the chance to take over the write
    pub async fn submit_bundle(&self, bundle: Bundle, principal: &Principal) -> Result<Bundle> {
        let mut result = None;
        for hook in self.hooks_for(BUNDLE_RESOURCE_TYPE)? {
            if let WriteDecision::Handled(replacement) = hook.on_bundle_saving(&bundle, principal).await? {
                result = Some(replacement);
                break;
            }
        }
        let committed = match result {
            Some(replacement) => replacement,
            None => self.persist(bundle, TransactionMode::Commit, principal).await?,
        };

        let has_deletes = committed.items.iter().any(|i| {
            i.operation == BatchOperation::Delete && i.record().is_some()
        });
        if has_deletes {
            for hook in self.hooks_for(BUNDLE_RESOURCE_TYPE)? {
                hook.on_bundle_deleted(&committed, principal).await?;
            }
        }
        Ok(committed)
    }

    async fn persist_single(
        &self,
        item: crate::models::BundleItem,
        principal: &Principal,
    ) -> Result<Record> {
        let persisted = self
            .persist(Bundle::from_items(vec![item]), TransactionMode::Commit, principal)
            .await?;
        let record = persisted.records().next().cloned();
        record.ok_or_else(|| Error::Internal("Persisted bundle returned no record".to_string()))
    }

    fn hooks_for(&self, resource_type: &str) -> Result<Vec<Arc<dyn PersistenceHook>>> {
        Ok(self
            .subscribers
            .lock()?
            .iter()
            .filter(|s| s.resource_type == resource_type)
            .map(|s| s.hook.clone())
            .collect())
    }
}

fn handled_record(bundle: &Bundle, record: Record) -> Record {
    record
        .key
        .and_then(|key| bundle.find_record(key).cloned())
        .unwrap_or(record)
}

/// Validate every item against the current state and return the bundle as it
/// will be stored. Nothing is applied if any item fails.
fn prepare(state: &StoreState, bundle: Bundle) -> Result<Bundle> {
    let mut prepared = Vec::with_capacity(bundle.items.len());
    for mut item in bundle.items {
        match (&item.operation, &mut item.data) {
            (BatchOperation::Insert, BundleData::Record(record)) => {
                let key = record.ensure_key();
                if state.records.contains_key(&key) {
                    return Err(Error::Persistence(format!(
                        "{}/{} already exists",
                        record.resource_type, key
                    )));
                }
                record.version = 1;
                if record.status == RecordStatus::New {
                    record.status = RecordStatus::Active;
                }
            }
            (BatchOperation::Update, BundleData::Record(record)) => {
                let key = record
                    .key
                    .ok_or_else(|| Error::Validation("Update requires a record key".to_string()))?;
                let current = state
                    .records
                    .get(&key)
                    .ok_or_else(|| Error::not_found(&record.resource_type, key))?;
                record.version = current.version + 1;
                if record.status == RecordStatus::New {
                    record.status = RecordStatus::Active;
                }
            }
            (BatchOperation::Delete, BundleData::Record(record)) => {
                let key = record
                    .key
                    .ok_or_else(|| Error::Validation("Delete requires a record key".to_string()))?;
                let current = state
                    .records
                    .get(&key)
                    .ok_or_else(|| Error::not_found(&record.resource_type, key))?;
                record.version = current.version + 1;
                record.status = RecordStatus::Nullified;
            }
            (BatchOperation::Insert | BatchOperation::Update, BundleData::Relationship(rel)) => {
                rel.key.get_or_insert_with(Uuid::new_v4);
            }
            (BatchOperation::Delete, BundleData::Relationship(rel)) => {
                if rel.key.is_none() {
                    return Err(Error::Validation(
                        "Relationship delete requires a key".to_string(),
                    ));
                }
            }
        }
        prepared.push(item);
    }
    Ok(Bundle::from_items(prepared))
}

fn apply(state: &mut StoreState, bundle: &Bundle) {
    for item in &bundle.items {
        match (&item.operation, &item.data) {
            (_, BundleData::Record(record)) => {
                if let Some(key) = record.key {
                    state.records.insert(key, record.clone());
                }
            }
            (BatchOperation::Delete, BundleData::Relationship(rel)) => {
                if let Some(key) = rel.key {
                    state.relationships.remove(&key);
                }
            }
            (_, BundleData::Relationship(rel)) => {
                if let Some(key) = rel.key {
                    state.relationships.insert(key, rel.clone());
                }
            }
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, resource_type: &str, key: Uuid) -> Result<Option<Record>> {
        Ok(self
            .state
            .read()?
            .records
            .get(&key)
            .filter(|r| r.resource_type == resource_type)
            .cloned())
    }

    async fn persist(
        &self,
        bundle: Bundle,
        mode: TransactionMode,
        principal: &Principal,
    ) -> Result<Bundle> {
        let mut state = self.state.write()?;
        let prepared = prepare(&state, bundle)?;
        if mode == TransactionMode::Commit {
            apply(&mut state, &prepared);
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
        tracing::trace!(
            items = prepared.len(),
            principal = %principal.name,
            ?mode,
            "Bundle persisted"
        );
        Ok(prepared)
    }

    async fn query_relationships(
        &self,
        filter: &RelationshipFilter,
        _principal: &Principal,
    ) -> Result<Vec<EntityRelationship>> {
        Ok(self
            .state
            .read()?
            .relationships
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn count_active(&self, resource_type: &str) -> Result<u64> {
        Ok(self
            .state
            .read()?
            .records
            .values()
            .filter(|r| r.resource_type == resource_type && r.status.is_active())
            .count() as u64)
    }

    async fn stream_active<'a>(
        &'a self,
        resource_type: &'a str,
        _mode: LoadMode,
    ) -> Result<BoxStream<'a, Result<Record>>> {
        let records: Vec<Record> = self
            .state
            .read()?
            .records
            .values()
            .filter(|r| r.resource_type == resource_type && r.status.is_active())
            .cloned()
            .collect();
        Ok(Box::pin(futures::stream::iter(records.into_iter().map(Ok))))
    }

    async fn purge_relationships(
        &self,
        filter: &RelationshipFilter,
        _mode: DeleteMode,
        _principal: &Principal,
    ) -> Result<u64> {
        let mut state = self.state.write()?;
        let before = state.relationships.len();
        state.relationships.retain(|_, r| !filter.matches(r));
        Ok((before - state.relationships.len()) as u64)
    }
}

impl HookRegistry for InMemoryRecordStore {
    fn subscribe(
        &self,
        resource_type: &str,
        hook: Arc<dyn PersistenceHook>,
    ) -> Result<HookSubscription> {
        let subscription = HookSubscription(Uuid::new_v4());
        tracing::debug!(resource_type, hook = hook.name(), "Hook subscribed");
        self.subscribers.lock()?.push(Subscriber {
            subscription,
            resource_type: resource_type.to_string(),
            hook,
        });
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: HookSubscription) -> Result<()> {
        self.subscribers
            .lock()?
            .retain(|s| s.subscription != subscription);
        Ok(())
    }
}
