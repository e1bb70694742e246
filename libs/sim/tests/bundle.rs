#[allow(unused)]
mod support;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use support::{clerk, key_of, patient, Harness, AUTO_CONFIG, PATIENT, REVIEW_CONFIG};
use uuid::Uuid;
use zunder_sim::{
    db::RecordStore,
    hooks::{BusinessRules, HookRegistry, BUNDLE_RESOURCE_TYPE},
    models::{
        BatchOperation, Bundle, BundleItem, EntityRelationship, Identifier, MatchClassification,
        Principal, Record, RecordStatus, RelationshipKind, TransactionMode,
    },
    services::BundleInterceptor,
};

/// Remembers which rule hooks ran, in order
#[derive(Clone, Default)]
struct RecordingRules(Arc<Mutex<Vec<&'static str>>>);

impl RecordingRules {
    fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    fn note(&self, hook: &'static str, bundle: Bundle) -> zunder_sim::Result<Bundle> {
        self.0.lock().unwrap().push(hook);
        Ok(bundle)
    }
}

#[async_trait]
impl BusinessRules for RecordingRules {
    async fn before_insert(&self, bundle: Bundle) -> zunder_sim::Result<Bundle> {
        self.note("before_insert", bundle)
    }

    async fn after_insert(&self, bundle: Bundle) -> zunder_sim::Result<Bundle> {
        self.note("after_insert", bundle)
    }

    async fn before_update(&self, bundle: Bundle) -> zunder_sim::Result<Bundle> {
        self.note("before_update", bundle)
    }

    async fn after_update(&self, bundle: Bundle) -> zunder_sim::Result<Bundle> {
        self.note("after_update", bundle)
    }
}

fn subscribe_bundle_interceptor(harness: &Harness) -> anyhow::Result<()> {
    let interceptor = BundleInterceptor::new(vec![harness.interceptor()], harness.state.clone());
    harness
        .store
        .subscribe(BUNDLE_RESOURCE_TYPE, Arc::new(interceptor))?;
    Ok(())
}

#[tokio::test]
async fn managed_records_are_classified_inside_the_bundle() -> anyhow::Result<()> {
    let harness = Harness::new();
    subscribe_bundle_interceptor(&harness)?;
    let existing = harness.seed(patient("7")).await?;
    let probable = harness.seed(patient("8")).await?;
    let commits = harness.store.commit_count();

    let merged = Uuid::new_v4();
    let linked = Uuid::new_v4();
    harness
        .matcher
        .script(merged, AUTO_CONFIG, &existing, MatchClassification::Match, 0.97);
    harness
        .matcher
        .script(linked, REVIEW_CONFIG, &probable, MatchClassification::Probable, 0.7);

    let encounter = Record::new("Encounter").with_key(Uuid::new_v4());
    let committed = harness
        .store
        .submit_bundle(
            Bundle::from_items(vec![
                BundleItem::insert_record(patient("1").with_key(merged)),
                BundleItem::insert_record(patient("2").with_key(linked)),
                BundleItem::insert_record(encounter.clone()),
            ]),
            &clerk(),
        )
        .await?;

    // One transaction for everything.
    assert_eq!(harness.store.commit_count(), commits + 1);
    assert_eq!(
        committed
            .records()
            .filter(|r| r.key == Some(merged))
            .count(),
        1
    );
    assert!(committed
        .relationships()
        .any(|r| r.kind == RelationshipKind::Replaces && r.target == merged));

    assert_eq!(harness.stored(merged).await?.status, RecordStatus::Obsolete);
    assert_eq!(harness.stored(linked).await?.status, RecordStatus::Active);
    assert!(harness.stored(key_of(&encounter)).await.is_ok());

    let edges = harness.candidate_edges()?;
    assert_eq!(edges.len(), 1);
    assert_eq!((edges[0].source, edges[0].target), (linked, key_of(&probable)));
    Ok(())
}

#[tokio::test]
async fn unmanaged_bundles_pass_through() -> anyhow::Result<()> {
    let harness = Harness::new();
    subscribe_bundle_interceptor(&harness)?;

    let committed = harness
        .store
        .submit_bundle(
            Bundle::from_items(vec![BundleItem::insert_record(Record::new("Encounter"))]),
            &clerk(),
        )
        .await?;

    assert_eq!(committed.len(), 1);
    assert_eq!(harness.matcher.calls(), 0);
    assert_eq!(harness.store.commit_count(), 1);
    Ok(())
}

#[tokio::test]
async fn deleted_records_lose_their_edges() -> anyhow::Result<()> {
    let harness = Harness::new();
    subscribe_bundle_interceptor(&harness)?;
    let r = harness.seed(patient("1")).await?;
    let a = harness.seed(patient("2")).await?;
    harness
        .store
        .persist(
            Bundle::from_items(vec![
                BundleItem::insert_relationship(EntityRelationship::duplicate(
                    PATIENT,
                    key_of(&a),
                    key_of(&r),
                    0.8,
                )),
                BundleItem::insert_relationship(EntityRelationship::ignored(
                    PATIENT,
                    key_of(&r),
                    key_of(&a),
                )),
            ]),
            TransactionMode::Commit,
            &Principal::system(),
        )
        .await?;

    let committed = harness
        .store
        .submit_bundle(
            Bundle::from_items(vec![BundleItem::delete_record(r.clone())]),
            &clerk(),
        )
        .await?;

    assert!(committed
        .items
        .iter()
        .any(|i| i.operation == BatchOperation::Delete));
    assert_eq!(harness.stored(key_of(&r)).await?.status, RecordStatus::Nullified);
    assert!(harness.store.relationships()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn two_records_merged_into_one_survivor_keep_all_identifiers() -> anyhow::Result<()> {
    let harness = Harness::new();
    subscribe_bundle_interceptor(&harness)?;
    let survivor = harness.seed(patient("7")).await?;

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    for key in [first, second] {
        harness
            .matcher
            .script(key, AUTO_CONFIG, &survivor, MatchClassification::Match, 0.97);
    }

    harness
        .store
        .submit_bundle(
            Bundle::from_items(vec![
                BundleItem::insert_record(patient("1").with_key(first)),
                BundleItem::insert_record(patient("2").with_key(second)),
            ]),
            &clerk(),
        )
        .await?;

    let merged = harness.stored(key_of(&survivor)).await?;
    for mrn in ["7", "1", "2"] {
        assert!(
            merged.identifiers.contains(&Identifier::new("MRN", mrn)),
            "MRN {} missing from {:?}",
            mrn,
            merged.identifiers
        );
    }
    assert_eq!(harness.stored(first).await?.status, RecordStatus::Obsolete);
    assert_eq!(harness.stored(second).await?.status, RecordStatus::Obsolete);
    assert_eq!(harness.replaces_edges()?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn survivor_edited_in_the_same_bundle_keeps_edits_and_merged_identifiers(
) -> anyhow::Result<()> {
    for survivor_first in [false, true] {
        let harness = Harness::new();
        subscribe_bundle_interceptor(&harness)?;
        let survivor = harness.seed(patient("7")).await?;
        let incoming = Uuid::new_v4();
        harness
            .matcher
            .script(incoming, AUTO_CONFIG, &survivor, MatchClassification::Match, 0.97);

        let edited = survivor
            .clone()
            .with_identifier(Identifier::new("SSN", "123-45-6789"));
        let mut items = vec![
            BundleItem::insert_record(patient("1").with_key(incoming)),
            BundleItem::update_record(edited),
        ];
        if survivor_first {
            items.reverse();
        }
        harness
            .store
            .submit_bundle(Bundle::from_items(items), &clerk())
            .await?;

        let stored = harness.stored(key_of(&survivor)).await?;
        assert!(stored.identifiers.contains(&Identifier::new("MRN", "7")));
        assert!(
            stored
                .identifiers
                .contains(&Identifier::new("SSN", "123-45-6789")),
            "client edit lost (survivor first: {})",
            survivor_first
        );
        assert!(
            stored.identifiers.contains(&Identifier::new("MRN", "1")),
            "merged identifier lost (survivor first: {})",
            survivor_first
        );
        assert_eq!(harness.stored(incoming).await?.status, RecordStatus::Obsolete);
    }
    Ok(())
}

#[tokio::test]
async fn update_only_bundles_run_update_rules() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    let rules = RecordingRules::default();
    harness.state.rules = Arc::new(rules.clone());
    subscribe_bundle_interceptor(&harness)?;
    let existing = harness.seed(patient("1")).await?;

    harness
        .store
        .submit_bundle(
            Bundle::from_items(vec![BundleItem::update_record(
                existing.with_identifier(Identifier::new("SSN", "1")),
            )]),
            &clerk(),
        )
        .await?;
    assert_eq!(rules.calls(), vec!["before_update", "after_update"]);

    harness
        .store
        .submit_bundle(
            Bundle::from_items(vec![BundleItem::insert_record(patient("2"))]),
            &clerk(),
        )
        .await?;
    assert_eq!(
        rules.calls(),
        vec!["before_update", "after_update", "before_insert", "after_insert"]
    );
    Ok(())
}
