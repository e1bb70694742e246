//! Per-type match/merge interceptor
//!
//! One `ResourceInterceptor` exists per managed resource type. It hooks record
//! writes, classifies the written record against the matching collaborator and
//! either merges it into a single confident candidate or refreshes its
//! candidate duplicate edges, committing everything as one bundle.

use crate::{
    db::RelationshipFilter,
    hooks::{PersistenceHook, WriteDecision},
    models::{
        BatchOperation, Bundle, BundleItem, DeleteMode, DetectionSummary, EntityRelationship,
        LoadMode, MatchClassification, MatchResult, MergeResult, MergeStatus, Principal, Record,
        RecordStatus, ScoredRecord, TransactionMode,
    },
    policy::permissions,
    services::{
        merge,
        runner::{BatchProcessor, MatchRunner},
        MergeService,
    },
    state::{MatchSettings, SimState},
    Error, Result,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Records streamed between progress reports during bulk detection
const PROGRESS_INTERVAL: u64 = 1_000;

/// Strengths closer than this are treated as the same score
const STRENGTH_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Insert,
    Update,
}

/// Best result seen for one candidate across every configuration
struct Candidate {
    result: MatchResult,
    auto_match: bool,
}

fn unordered_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn rank(classification: MatchClassification) -> u8 {
    match classification {
        MatchClassification::Match => 2,
        MatchClassification::Probable => 1,
        MatchClassification::NonMatch => 0,
    }
}

#[derive(Clone)]
pub struct ResourceInterceptor {
    resource_type: String,
    hook_name: String,
    state: SimState,
    settings: MatchSettings,
}

impl ResourceInterceptor {
    pub fn new(resource_type: &str, state: SimState, settings: MatchSettings) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            hook_name: format!("sim-interceptor:{}", resource_type),
            state,
            settings,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn record_key(record: &Record) -> Result<Uuid> {
        record
            .key
            .ok_or_else(|| Error::Validation("Record has no key".to_string()))
    }

    async fn load(&self, key: Uuid) -> Result<Record> {
        self.state
            .store
            .get(&self.resource_type, key)
            .await?
            .ok_or_else(|| Error::not_found(&self.resource_type, key))
    }

    async fn edges(
        &self,
        filter: RelationshipFilter,
        principal: &Principal,
    ) -> Result<Vec<EntityRelationship>> {
        self.state.store.query_relationships(&filter, principal).await
    }

    /// Keys explicitly marked as "not a duplicate" of `key`, in either direction
    async fn ignored_keys_of(&self, key: Uuid, principal: &Principal) -> Result<Vec<Uuid>> {
        let edges = self
            .edges(
                RelationshipFilter::duplicates(&self.resource_type)
                    .involving(key)
                    .negated(true),
                principal,
            )
            .await?;
        let mut keys = Vec::new();
        for edge in edges {
            let other = edge.other_end(key);
            if !keys.contains(&other) {
                keys.push(other);
            }
        }
        Ok(keys)
    }

    /// Run every active configuration and keep the best result per candidate.
    async fn collect_candidates(
        &self,
        record: &Record,
        key: Uuid,
        ignored: &[Uuid],
    ) -> Result<Vec<Candidate>> {
        let configurations = self
            .state
            .configurations
            .active_configurations(&self.resource_type)
            .await?;

        let mut best: HashMap<Uuid, Candidate> = HashMap::new();
        for configuration in configurations.iter().filter(|c| c.active) {
            let results = self
                .state
                .matcher
                .match_records(record, configuration, ignored)
                .await?;

            for result in results {
                let Some(candidate_key) = result.candidate_key() else {
                    continue;
                };
                if candidate_key == key
                    || ignored.contains(&candidate_key)
                    || result.classification == MatchClassification::NonMatch
                {
                    continue;
                }

                let auto_match = result.classification == MatchClassification::Match
                    && configuration.is_auto_match();
                let replace = match best.get(&candidate_key) {
                    Some(current) => {
                        (rank(result.classification), result.strength)
                            > (rank(current.result.classification), current.result.strength)
                    }
                    None => true,
                };
                if replace {
                    best.insert(candidate_key, Candidate { result, auto_match });
                } else if auto_match {
                    if let Some(current) = best.get_mut(&candidate_key) {
                        current.auto_match |=
                            current.result.classification == MatchClassification::Match;
                    }
                }
            }
        }

        Ok(best.into_values().collect())
    }

    /// Run the matcher for `record`, honouring its ignore markers.
    async fn assess(&self, record: &Record) -> Result<Vec<Candidate>> {
        let key = Self::record_key(record)?;
        let ignored = self.ignored_keys_of(key, &Principal::system()).await?;
        self.collect_candidates(record, key, &ignored).await
    }

    /// Classify `record` and return the bundle items that act on the outcome.
    ///
    /// An empty result means nothing needs to change. With `allow_auto_merge`,
    /// a single auto-matchable `Match` with no `Probable` results merges the
    /// record into that candidate; otherwise the record's candidate edges are
    /// replaced by the current candidate set.
    pub async fn classify(&self, record: &Record, allow_auto_merge: bool) -> Result<Vec<BundleItem>> {
        self.classify_pending(record, allow_auto_merge, &Bundle::new())
            .await
    }

    /// Like [`classify`](Self::classify), for a record that is part of the
    /// not yet committed `pending` bundle. A survivor that `pending` already
    /// writes is merged from its pending form instead of the stored one.
    pub async fn classify_pending(
        &self,
        record: &Record,
        allow_auto_merge: bool,
        pending: &Bundle,
    ) -> Result<Vec<BundleItem>> {
        let candidates = self.assess(record).await?;
        self.act(record, candidates, allow_auto_merge, pending).await
    }

    async fn act(
        &self,
        record: &Record,
        candidates: Vec<Candidate>,
        allow_auto_merge: bool,
        pending: &Bundle,
    ) -> Result<Vec<BundleItem>> {
        let key = Self::record_key(record)?;
        let system = Principal::system();

        let matches: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.result.classification == MatchClassification::Match)
            .collect();
        let probable_count = candidates.len() - matches.len();

        if allow_auto_merge && matches.len() == 1 && probable_count == 0 && matches[0].auto_match {
            let chosen = &matches[0].result;
            let survivor_key = Self::record_key(&chosen.candidate)?;
            let mut survivor = match pending.find_record(survivor_key) {
                Some(written) => written.clone(),
                None => match self.state.store.get(&self.resource_type, survivor_key).await? {
                    Some(stored) => stored,
                    None => chosen.candidate.clone(),
                },
            };

            tracing::info!(
                resource_type = %self.resource_type,
                record_key = %key,
                survivor_key = %survivor_key,
                strength = chosen.strength,
                "Auto-merging record into matched candidate"
            );

            let mut items = self
                .subsume(&mut survivor, record.clone(), RecordStatus::Obsolete, &system)
                .await?;
            items.insert(0, BundleItem::update_record(survivor));
            return Ok(items);
        }

        self.candidate_edge_items(key, &candidates, &system).await
    }

    /// Edits that make `key`'s outgoing candidate edges equal to `candidates`.
    async fn candidate_edge_items(
        &self,
        key: Uuid,
        candidates: &[Candidate],
        principal: &Principal,
    ) -> Result<Vec<BundleItem>> {
        let mut wanted: HashMap<Uuid, f64> = candidates
            .iter()
            .filter_map(|c| c.result.candidate_key().map(|k| (k, c.result.strength)))
            .collect();
        let candidate_keys: HashSet<Uuid> = wanted.keys().copied().collect();

        let existing = self
            .edges(
                RelationshipFilter::duplicates(&self.resource_type)
                    .involving(key)
                    .negated(false),
                principal,
            )
            .await?;

        let mut items = Vec::new();
        for edge in existing {
            if edge.source == key {
                let unchanged = wanted
                    .get(&edge.target)
                    .is_some_and(|strength| (strength - edge.strength).abs() < STRENGTH_EPSILON);
                if unchanged {
                    wanted.remove(&edge.target);
                } else {
                    items.push(BundleItem::delete_relationship(edge));
                }
            } else if candidate_keys.contains(&edge.source) {
                // Re-orient the pair so it is only ever stored once.
                items.push(BundleItem::delete_relationship(edge));
            }
        }

        let mut additions: Vec<(Uuid, f64)> = wanted.into_iter().collect();
        additions.sort_by(|a, b| a.0.cmp(&b.0));
        for (target, strength) in additions {
            items.push(BundleItem::insert_relationship(EntityRelationship::duplicate(
                &self.resource_type,
                key,
                target,
                strength,
            )));
        }

        if !items.is_empty() {
            tracing::debug!(
                resource_type = %self.resource_type,
                record_key = %key,
                candidates = candidates.len(),
                edits = items.len(),
                "Refreshing merge candidates"
            );
        }
        Ok(items)
    }

    /// Fold `subsumed` into `survivor` and return the edits for the subsumed
    /// side: its new status, the `Replaces` audit edge and removal of every
    /// duplicate edge that references it. The caller persists `survivor`.
    async fn subsume(
        &self,
        survivor: &mut Record,
        mut subsumed: Record,
        status: RecordStatus,
        principal: &Principal,
    ) -> Result<Vec<BundleItem>> {
        let survivor_key = Self::record_key(survivor)?;
        let subsumed_key = Self::record_key(&subsumed)?;

        let copied = merge::absorb(survivor, &mut subsumed, status);
        tracing::debug!(
            resource_type = %self.resource_type,
            survivor_key = %survivor_key,
            subsumed_key = %subsumed_key,
            identifiers_copied = copied,
            "Record subsumed"
        );

        let mut items = vec![
            BundleItem::update_record(subsumed),
            BundleItem::insert_relationship(EntityRelationship::replaces(
                &self.resource_type,
                survivor_key,
                subsumed_key,
            )),
        ];
        items.extend(
            self.duplicate_edges_of(subsumed_key, principal)
                .await?
                .into_iter()
                .map(BundleItem::delete_relationship),
        );
        Ok(items)
    }

    /// Every duplicate edge, negated or not, referencing `key`
    async fn duplicate_edges_of(
        &self,
        key: Uuid,
        principal: &Principal,
    ) -> Result<Vec<EntityRelationship>> {
        self.edges(
            RelationshipFilter::duplicates(&self.resource_type).involving(key),
            principal,
        )
        .await
    }

    /// Edits that detach a deleted record from every duplicate edge
    pub async fn prepare_delete(&self, key: Uuid) -> Result<Vec<BundleItem>> {
        Ok(self
            .duplicate_edges_of(key, &Principal::system())
            .await?
            .into_iter()
            .map(BundleItem::delete_relationship)
            .collect())
    }

    async fn commit(&self, bundle: Bundle, kind: WriteKind, principal: &Principal) -> Result<Bundle> {
        let rules = &self.state.rules;
        let bundle = match kind {
            WriteKind::Insert => rules.before_insert(bundle).await?,
            WriteKind::Update => rules.before_update(bundle).await?,
        };
        let committed = self
            .state
            .store
            .persist(bundle, TransactionMode::Commit, principal)
            .await?;
        match kind {
            WriteKind::Insert => rules.after_insert(committed).await,
            WriteKind::Update => rules.after_update(committed).await,
        }
    }

    async fn intercept_write(
        &self,
        record: &mut Record,
        kind: WriteKind,
        principal: &Principal,
    ) -> Result<WriteDecision> {
        let key = record.ensure_key();
        let items = self.classify(record, true).await?;
        if items.is_empty() {
            tracing::trace!(resource_type = %self.resource_type, record_key = %key, "No match actions");
            return Ok(WriteDecision::Proceed);
        }

        let original = match kind {
            WriteKind::Insert => BundleItem::insert_record(record.clone()),
            WriteKind::Update => BundleItem::update_record(record.clone()),
        };
        let mut bundle = Bundle::from_items(vec![original]);
        bundle.extend(items);

        let committed = self.commit(bundle, kind, principal).await?;
        if let Some(stored) = committed.find_record(key) {
            *record = stored.clone();
        }
        Ok(WriteDecision::Handled(committed))
    }

    async fn purge(&self, filter: RelationshipFilter, principal: &Principal) -> Result<u64> {
        let removed = self
            .state
            .store
            .purge_relationships(&filter, DeleteMode::Permanent, principal)
            .await?;
        tracing::info!(
            resource_type = %self.resource_type,
            removed,
            negated = ?filter.negated,
            record_key = ?filter.involving,
            "Duplicate edges purged"
        );
        Ok(removed)
    }

    /// Edges between `master_key` and any of `keys`, restricted to negation state
    async fn edges_between(
        &self,
        master_key: Uuid,
        keys: &HashSet<Uuid>,
        negated: bool,
        principal: &Principal,
    ) -> Result<Vec<EntityRelationship>> {
        Ok(self
            .edges(
                RelationshipFilter::duplicates(&self.resource_type)
                    .involving(master_key)
                    .negated(negated),
                principal,
            )
            .await?
            .into_iter()
            .filter(|e| keys.contains(&e.other_end(master_key)))
            .collect())
    }

    async fn stream_into(
        &self,
        runner: &MatchRunner,
        total: u64,
        started: Instant,
    ) -> Result<u64> {
        let mut stream = self
            .state
            .store
            .stream_active(&self.resource_type, LoadMode::Quick)
            .await?;

        let mut streamed = 0u64;
        while let Some(record) = stream.next().await {
            let record = record?;
            runner
                .submit(record)
                .await
                .map_err(|e| Error::WorkerFault(Box::new(e)))?;
            streamed += 1;

            if streamed % PROGRESS_INTERVAL == 0 {
                let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::info!(
                    resource_type = %self.resource_type,
                    streamed,
                    total,
                    percent = streamed as f64 * 100.0 / total.max(1) as f64,
                    records_per_sec = runner.processed() as f64 / elapsed,
                    "Detecting merge candidates"
                );
            }
        }
        Ok(streamed)
    }
}

/// Upsert classification edits into `bundle`, dropping a new candidate edge
/// whose reverse the bundle already inserts.
pub(crate) fn fold_edits(bundle: &mut Bundle, items: Vec<BundleItem>) {
    for item in items {
        let mirrored = item.operation == BatchOperation::Insert
            && item.relationship().is_some_and(|edge| {
                !edge.negated
                    && bundle.items.iter().any(|pending| {
                        pending.operation == BatchOperation::Insert
                            && pending.relationship().is_some_and(|p| {
                                !p.negated && p.source == edge.target && p.target == edge.source
                            })
                    })
            });
        if !mirrored {
            bundle.upsert(item);
        }
    }
}

/// Bulk-session work: classify each record without auto-merging and commit
/// the resulting candidate edits of a batch together.
struct CandidateBatch {
    interceptor: ResourceInterceptor,
    /// Held from reading a batch's current edges until its bundle is committed
    commit_lock: Mutex<()>,
}

#[async_trait]
impl BatchProcessor for CandidateBatch {
    async fn process_batch(&self, batch: Vec<Record>) -> Result<()> {
        let mut assessed = Vec::with_capacity(batch.len());
        for record in batch.iter().filter(|r| r.key.is_some()) {
            assessed.push((record, self.interceptor.assess(record).await?));
        }

        let _commit = self.commit_lock.lock().await;
        let mut bundle = Bundle::new();
        for (record, candidates) in assessed {
            let items = self
                .interceptor
                .act(record, candidates, false, &bundle)
                .await?;
            fold_edits(&mut bundle, items);
        }

        if bundle.is_empty() {
            return Ok(());
        }
        self.interceptor
            .state
            .store
            .persist(bundle, TransactionMode::Commit, &Principal::system())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceHook for ResourceInterceptor {
    fn name(&self) -> &str {
        &self.hook_name
    }

    async fn on_inserting(&self, record: &mut Record, principal: &Principal) -> Result<WriteDecision> {
        self.intercept_write(record, WriteKind::Insert, principal).await
    }

    async fn on_updating(&self, record: &mut Record, principal: &Principal) -> Result<WriteDecision> {
        self.intercept_write(record, WriteKind::Update, principal).await
    }

    async fn on_deleted(&self, record: &Record, _principal: &Principal) -> Result<()> {
        let key = Self::record_key(record)?;
        let items = self.prepare_delete(key).await?;
        if items.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            resource_type = %self.resource_type,
            record_key = %key,
            edges = items.len(),
            "Removing duplicate edges of deleted record"
        );
        self.state
            .store
            .persist(Bundle::from_items(items), TransactionMode::Commit, &Principal::system())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MergeService for ResourceInterceptor {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    async fn merge(
        &self,
        survivor_key: Uuid,
        duplicate_keys: &[Uuid],
        principal: &Principal,
    ) -> Result<MergeResult> {
        self.state
            .policy
            .demand(permissions::WRITE_CLINICAL_DATA, principal)?;

        if duplicate_keys.contains(&survivor_key) {
            return Err(Error::Validation(format!(
                "Cannot merge {}/{} into itself",
                self.resource_type, survivor_key
            )));
        }

        let mut survivor = self.load(survivor_key).await?;
        let mut replaced = Vec::new();
        let mut subsumed_items = Vec::new();
        for &duplicate_key in duplicate_keys {
            if replaced.contains(&duplicate_key) {
                continue;
            }
            let duplicate = self.load(duplicate_key).await?;
            subsumed_items.extend(
                self.subsume(&mut survivor, duplicate, RecordStatus::Nullified, principal)
                    .await?,
            );
            replaced.push(duplicate_key);
        }

        let mut bundle = Bundle::from_items(vec![BundleItem::update_record(survivor)]);
        bundle.extend(subsumed_items);
        self.commit(bundle, WriteKind::Update, principal).await?;

        tracing::info!(
            resource_type = %self.resource_type,
            survivor_key = %survivor_key,
            replaced = replaced.len(),
            principal = %principal.name,
            "Records merged"
        );

        Ok(MergeResult {
            status: MergeStatus::Success,
            survivors: vec![survivor_key],
            replaced,
        })
    }

    async fn unmerge(
        &self,
        _master_key: Uuid,
        _unmerge_key: Uuid,
        _principal: &Principal,
    ) -> Result<MergeResult> {
        Err(Error::Unsupported(
            "Single instance merges obsolete the subsumed record and cannot be reversed"
                .to_string(),
        ))
    }

    async fn ignore(
        &self,
        master_key: Uuid,
        false_positive_keys: &[Uuid],
        principal: &Principal,
    ) -> Result<Record> {
        self.state
            .policy
            .demand(permissions::WRITE_CLINICAL_DATA, principal)?;

        self.load(master_key).await?;
        let mut keys = HashSet::new();
        for &key in false_positive_keys.iter().filter(|k| **k != master_key) {
            self.load(key).await?;
            keys.insert(key);
        }

        let mut bundle = Bundle::new();
        for edge in self.edges_between(master_key, &keys, true, principal).await? {
            bundle.push(BundleItem::delete_relationship(edge));
        }
        let mut ordered: Vec<Uuid> = keys.iter().copied().collect();
        ordered.sort();
        for key in ordered {
            bundle.push(BundleItem::insert_relationship(EntityRelationship::ignored(
                &self.resource_type,
                master_key,
                key,
            )));
        }

        if !bundle.is_empty() {
            self.commit(bundle, WriteKind::Update, principal).await?;
        }
        tracing::info!(
            resource_type = %self.resource_type,
            master_key = %master_key,
            ignored = keys.len(),
            "Candidates marked as not duplicates"
        );

        self.load(master_key).await
    }

    async fn unignore(
        &self,
        master_key: Uuid,
        ignored_keys: &[Uuid],
        principal: &Principal,
    ) -> Result<Record> {
        self.state
            .policy
            .demand(permissions::WRITE_CLINICAL_DATA, principal)?;

        self.load(master_key).await?;
        let keys: HashSet<Uuid> = ignored_keys.iter().copied().collect();
        let items: Vec<BundleItem> = self
            .edges_between(master_key, &keys, true, principal)
            .await?
            .into_iter()
            .map(BundleItem::delete_relationship)
            .collect();

        if !items.is_empty() {
            tracing::info!(
                resource_type = %self.resource_type,
                master_key = %master_key,
                restored = items.len(),
                "Ignore markers removed"
            );
            self.commit(Bundle::from_items(items), WriteKind::Update, principal)
                .await?;
        }

        self.load(master_key).await
    }

    async fn get_merge_candidate_keys(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<Uuid>> {
        Ok(self
            .get_candidate_edges(master_key, principal)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    async fn get_merge_candidates(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<ScoredRecord>> {
        let mut scored = Vec::new();
        for (key, strength) in self.get_candidate_edges(master_key, principal).await? {
            if let Some(record) = self.state.store.get(&self.resource_type, key).await? {
                scored.push(ScoredRecord { record, strength });
            }
        }
        Ok(scored)
    }

    async fn get_ignored_keys(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<Uuid>> {
        self.ignored_keys_of(master_key, principal).await
    }

    async fn get_ignored(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for key in self.ignored_keys_of(master_key, principal).await? {
            if let Some(record) = self.state.store.get(&self.resource_type, key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn get_global_merge_candidates(&self, principal: &Principal) -> Result<Vec<EntityRelationship>> {
        let ignored: HashSet<(Uuid, Uuid)> = self
            .edges(
                RelationshipFilter::duplicates(&self.resource_type).negated(true),
                principal,
            )
            .await?
            .iter()
            .map(|e| unordered_pair(e.source, e.target))
            .collect();

        Ok(self
            .edges(
                RelationshipFilter::duplicates(&self.resource_type).negated(false),
                principal,
            )
            .await?
            .into_iter()
            .filter(|e| !ignored.contains(&unordered_pair(e.source, e.target)))
            .collect())
    }

    async fn detect_merge_candidates(&self, master_key: Uuid, principal: &Principal) -> Result<Vec<Uuid>> {
        self.state
            .policy
            .demand(permissions::WRITE_CLINICAL_DATA, principal)?;

        let record = self.load(master_key).await?;
        let items = self.classify(&record, false).await?;
        if !items.is_empty() {
            self.commit(Bundle::from_items(items), WriteKind::Update, principal)
                .await?;
        }
        self.get_merge_candidate_keys(master_key, principal).await
    }

    async fn detect_global_merge_candidates(&self, principal: &Principal) -> Result<DetectionSummary> {
        self.state
            .policy
            .demand(permissions::UNRESTRICTED_ADMINISTRATION, principal)?;

        let worker_count = self.settings.worker_count();
        let total = self.state.store.count_active(&self.resource_type).await?;
        let started = Instant::now();
        tracing::info!(
            resource_type = %self.resource_type,
            total,
            worker_count,
            "Starting global merge candidate detection"
        );

        let processor = Arc::new(CandidateBatch {
            interceptor: self.clone(),
            commit_lock: Mutex::new(()),
        });
        let mut runner = MatchRunner::start(worker_count, processor);

        let outcome = match self.stream_into(&runner, total, started).await {
            Ok(streamed) => runner
                .drain()
                .await
                .map(|_| streamed)
                .map_err(|e| Error::WorkerFault(Box::new(e))),
            Err(e) => Err(e),
        };
        let processed = runner.processed();
        runner.shutdown().await;

        let streamed = outcome?;
        let summary = DetectionSummary {
            resource_type: self.resource_type.clone(),
            streamed,
            processed,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            resource_type = %self.resource_type,
            streamed = summary.streamed,
            processed = summary.processed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            records_per_sec = summary.throughput(),
            "Global merge candidate detection complete"
        );
        Ok(summary)
    }

    async fn clear_global_merge_candidates(&self, principal: &Principal) -> Result<u64> {
        self.state
            .policy
            .demand(permissions::UNRESTRICTED_ADMINISTRATION, principal)?;
        self.purge(
            RelationshipFilter::duplicates(&self.resource_type).negated(false),
            principal,
        )
        .await
    }

    async fn clear_global_ignore_flags(&self, principal: &Principal) -> Result<u64> {
        self.state
            .policy
            .demand(permissions::UNRESTRICTED_ADMINISTRATION, principal)?;
        self.purge(
            RelationshipFilter::duplicates(&self.resource_type).negated(true),
            principal,
        )
        .await
    }

    async fn clear_merge_candidates(&self, master_key: Uuid, principal: &Principal) -> Result<u64> {
        self.state
            .policy
            .demand(permissions::WRITE_CLINICAL_DATA, principal)?;
        self.purge(
            RelationshipFilter::duplicates(&self.resource_type)
                .involving(master_key)
                .negated(false),
            principal,
        )
        .await
    }

    async fn clear_ignore_flags(&self, master_key: Uuid, principal: &Principal) -> Result<u64> {
        self.state
            .policy
            .demand(permissions::WRITE_CLINICAL_DATA, principal)?;
        self.purge(
            RelationshipFilter::duplicates(&self.resource_type)
                .involving(master_key)
                .negated(true),
            principal,
        )
        .await
    }

    async fn reset(
        &self,
        master_key: Option<Uuid>,
        include_verified: bool,
        links_only: bool,
        principal: &Principal,
    ) -> Result<u64> {
        self.state
            .policy
            .demand(permissions::UNRESTRICTED_ADMINISTRATION, principal)?;

        let mut filter = RelationshipFilter::duplicates(&self.resource_type);
        if let Some(key) = master_key {
            filter = filter.involving(key);
        }
        if !include_verified {
            filter = filter.negated(false);
        }
        tracing::debug!(
            resource_type = %self.resource_type,
            links_only,
            include_verified,
            "Resetting merge state"
        );
        self.purge(filter, principal).await
    }
}

impl ResourceInterceptor {
    /// Candidate keys of `master_key` with their best strength, excluding ignored keys
    async fn get_candidate_edges(
        &self,
        master_key: Uuid,
        principal: &Principal,
    ) -> Result<Vec<(Uuid, f64)>> {
        let ignored = self.ignored_keys_of(master_key, principal).await?;
        let edges = self
            .edges(
                RelationshipFilter::duplicates(&self.resource_type)
                    .involving(master_key)
                    .negated(false),
                principal,
            )
            .await?;

        let mut candidates: Vec<(Uuid, f64)> = Vec::new();
        for edge in edges {
            let other = edge.other_end(master_key);
            if ignored.contains(&other) {
                continue;
            }
            match candidates.iter_mut().find(|(k, _)| *k == other) {
                Some((_, strength)) => *strength = strength.max(edge.strength),
                None => candidates.push((other, edge.strength)),
            }
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(candidates)
    }
}
