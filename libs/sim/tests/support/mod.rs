//! Shared fixtures for engine integration tests

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use uuid::Uuid;
use zunder_sim::{
    db::{InMemoryRecordStore, RecordStore},
    hooks::NoBusinessRules,
    jobs::InProcessJobManager,
    matching::{MatchConfigurationProvider, RecordMatcher},
    models::{
        EntityRelationship, Identifier, MatchClassification, MatchConfiguration, MatchResult,
        Principal, Record, RelationshipKind, AUTO_MATCH_TAG,
    },
    policy::PolicyEnforcement,
    services::ResourceInterceptor,
    state::{MatchSettings, SimState},
    Error, Result,
};

pub const PATIENT: &str = "Patient";
pub const AUTO_CONFIG: &str = "auto";
pub const REVIEW_CONFIG: &str = "review";

pub fn auto_config() -> MatchConfiguration {
    MatchConfiguration::new(AUTO_CONFIG, PATIENT).with_tag(AUTO_MATCH_TAG, "true")
}

pub fn review_config() -> MatchConfiguration {
    MatchConfiguration::new(REVIEW_CONFIG, PATIENT)
}

pub fn clerk() -> Principal {
    Principal::user("clerk")
}

pub fn patient(mrn: &str) -> Record {
    Record::new(PATIENT).with_identifier(Identifier::new("MRN", mrn))
}

/// One scripted result: `candidate` is returned for the subject under `configuration_id`
#[derive(Clone)]
struct Scripted {
    configuration_id: String,
    candidate: Record,
    classification: MatchClassification,
    strength: f64,
}

/// Matcher that returns results scripted per subject key
#[derive(Default)]
pub struct ScriptedMatcher {
    scripts: Mutex<HashMap<Uuid, Vec<Scripted>>>,
    failing: Mutex<HashSet<Uuid>>,
    calls: AtomicUsize,
}

impl ScriptedMatcher {
    pub fn script(
        &self,
        subject: Uuid,
        configuration_id: &str,
        candidate: &Record,
        classification: MatchClassification,
        strength: f64,
    ) {
        self.scripts
            .lock()
            .unwrap()
            .entry(subject)
            .or_default()
            .push(Scripted {
                configuration_id: configuration_id.to_string(),
                candidate: candidate.clone(),
                classification,
                strength,
            });
    }

    pub fn clear(&self, subject: Uuid) {
        self.scripts.lock().unwrap().remove(&subject);
    }

    pub fn fail_for(&self, subject: Uuid) {
        self.failing.lock().unwrap().insert(subject);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordMatcher for ScriptedMatcher {
    async fn match_records(
        &self,
        record: &Record,
        configuration: &MatchConfiguration,
        exclude: &[Uuid],
    ) -> Result<Vec<MatchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(key) = record.key else {
            return Ok(Vec::new());
        };
        if self.failing.lock().unwrap().contains(&key) {
            return Err(Error::Matching(format!("scripted failure for {}", key)));
        }

        let scripts = self.scripts.lock().unwrap();
        Ok(scripts
            .get(&key)
            .into_iter()
            .flatten()
            .filter(|s| s.configuration_id == configuration.id)
            .filter(|s| s.candidate.key.map_or(true, |k| !exclude.contains(&k)))
            .map(|s| MatchResult {
                candidate: s.candidate.clone(),
                classification: s.classification,
                strength: s.strength,
                configuration_id: s.configuration_id.clone(),
            })
            .collect())
    }
}

pub struct StaticConfigurations(pub Vec<MatchConfiguration>);

#[async_trait]
impl MatchConfigurationProvider for StaticConfigurations {
    async fn active_configurations(&self, resource_type: &str) -> Result<Vec<MatchConfiguration>> {
        Ok(self
            .0
            .iter()
            .filter(|c| c.resource_type == resource_type)
            .cloned()
            .collect())
    }
}

/// Grants every permission except to principals named in `denied`
#[derive(Default)]
pub struct TestPolicy {
    denied: HashSet<String>,
}

impl TestPolicy {
    pub fn denying(name: &str) -> Self {
        Self {
            denied: [name.to_string()].into_iter().collect(),
        }
    }
}

impl PolicyEnforcement for TestPolicy {
    fn demand(&self, permission: &str, principal: &Principal) -> Result<()> {
        if self.denied.contains(&principal.name) {
            return Err(Error::PermissionDenied(format!(
                "{} lacks {}",
                principal.name, permission
            )));
        }
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryRecordStore>,
    pub matcher: Arc<ScriptedMatcher>,
    pub jobs: Arc<InProcessJobManager>,
    pub state: SimState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(vec![auto_config(), review_config()], TestPolicy::default())
    }

    pub fn with(configurations: Vec<MatchConfiguration>, policy: TestPolicy) -> Self {
        let store = Arc::new(InMemoryRecordStore::new());
        let matcher = Arc::new(ScriptedMatcher::default());
        let jobs = Arc::new(InProcessJobManager::new());
        let state = SimState {
            store: store.clone(),
            hooks: store.clone(),
            matcher: matcher.clone(),
            configurations: Arc::new(StaticConfigurations(configurations)),
            policy: Arc::new(policy),
            rules: Arc::new(NoBusinessRules),
            jobs: jobs.clone(),
        };
        Self {
            store,
            matcher,
            jobs,
            state,
        }
    }

    pub fn interceptor(&self) -> ResourceInterceptor {
        self.interceptor_with(MatchSettings {
            single_node: false,
            match_workers: Some(2),
        })
    }

    pub fn interceptor_with(&self, settings: MatchSettings) -> ResourceInterceptor {
        ResourceInterceptor::new(PATIENT, self.state.clone(), settings)
    }

    pub async fn seed(&self, record: Record) -> anyhow::Result<Record> {
        Ok(self.store.seed(record).await?)
    }

    pub async fn stored(&self, key: Uuid) -> anyhow::Result<Record> {
        self.store
            .record(key)?
            .ok_or_else(|| anyhow::anyhow!("record {} missing", key))
    }

    /// Non-negated duplicate edges, in either direction
    pub fn candidate_edges(&self) -> anyhow::Result<Vec<EntityRelationship>> {
        Ok(self
            .store
            .relationships()?
            .into_iter()
            .filter(|r| r.kind == RelationshipKind::Duplicate && !r.negated)
            .collect())
    }

    pub fn ignore_edges(&self) -> anyhow::Result<Vec<EntityRelationship>> {
        Ok(self
            .store
            .relationships()?
            .into_iter()
            .filter(|r| r.kind == RelationshipKind::Duplicate && r.negated)
            .collect())
    }

    pub fn replaces_edges(&self) -> anyhow::Result<Vec<EntityRelationship>> {
        Ok(self
            .store
            .relationships()?
            .into_iter()
            .filter(|r| r.kind == RelationshipKind::Replaces)
            .collect())
    }

    pub async fn active_count(&self) -> anyhow::Result<u64> {
        Ok(self.store.count_active(PATIENT).await?)
    }
}

pub fn key_of(record: &Record) -> Uuid {
    record.key.expect("record has a key")
}
