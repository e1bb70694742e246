//! Bundle-level interception for transactions that touch managed types

use crate::{
    hooks::{PersistenceHook, WriteDecision},
    models::{BatchOperation, Bundle, BundleItem, Principal, TransactionMode},
    services::{interceptor::fold_edits, ResourceInterceptor},
    state::SimState,
    Result,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Rewrites client bundles so that every managed record in them goes through
/// the same classification as a single-record write, in one transaction.
pub struct BundleInterceptor {
    interceptors: HashMap<String, ResourceInterceptor>,
    state: SimState,
}

impl BundleInterceptor {
    pub fn new(interceptors: impl IntoIterator<Item = ResourceInterceptor>, state: SimState) -> Self {
        Self {
            interceptors: interceptors
                .into_iter()
                .map(|i| (i.resource_type().to_string(), i))
                .collect(),
            state,
        }
    }

    pub fn managed_types(&self) -> impl Iterator<Item = &str> {
        self.interceptors.keys().map(String::as_str)
    }

    fn interceptor_for(&self, item: &BundleItem) -> Option<&ResourceInterceptor> {
        item.record()
            .and_then(|r| self.interceptors.get(&r.resource_type))
    }

    /// Build the bundle that replaces `bundle`, or `None` when no item is managed.
    ///
    /// Client items are laid down first so that a merge into a record the
    /// bundle also writes starts from the written form of that record.
    pub async fn rewrite(&self, bundle: &Bundle) -> Result<Option<Bundle>> {
        if !bundle.items.iter().any(|i| self.interceptor_for(i).is_some()) {
            return Ok(None);
        }

        let mut replacement = Bundle::new();
        let mut to_classify = Vec::new();
        for item in &bundle.items {
            let mut item = item.clone();
            let managed_write = self.interceptor_for(&item).is_some()
                && matches!(item.operation, BatchOperation::Insert | BatchOperation::Update);
            if let Some(record) = item.data.record_mut().filter(|_| managed_write) {
                let key = record.ensure_key();
                if !to_classify.contains(&key) {
                    to_classify.push(key);
                }
            }
            replacement.upsert(item);
        }

        for key in to_classify {
            let Some(record) = replacement.find_record(key).cloned() else {
                continue;
            };
            let Some(interceptor) = self.interceptors.get(&record.resource_type) else {
                continue;
            };
            let actions = interceptor
                .classify_pending(&record, true, &replacement)
                .await?;
            fold_edits(&mut replacement, actions);
        }

        Ok(Some(replacement))
    }
}

#[async_trait]
impl PersistenceHook for BundleInterceptor {
    fn name(&self) -> &str {
        "sim-bundle-interceptor"
    }

    async fn on_bundle_saving(&self, bundle: &Bundle, principal: &Principal) -> Result<WriteDecision> {
        let Some(replacement) = self.rewrite(bundle).await? else {
            return Ok(WriteDecision::Proceed);
        };

        tracing::debug!(
            submitted = bundle.len(),
            committed = replacement.len(),
            "Committing rewritten bundle"
        );

        let rules = &self.state.rules;
        let inserts = replacement
            .items
            .iter()
            .any(|i| i.operation == BatchOperation::Insert);
        let replacement = if inserts {
            rules.before_insert(replacement).await?
        } else {
            rules.before_update(replacement).await?
        };
        let committed = self
            .state
            .store
            .persist(replacement, TransactionMode::Commit, principal)
            .await?;
        let committed = if inserts {
            rules.after_insert(committed).await?
        } else {
            rules.after_update(committed).await?
        };
        Ok(WriteDecision::Handled(committed))
    }

    async fn on_bundle_deleted(&self, bundle: &Bundle, _principal: &Principal) -> Result<()> {
        let mut cleanup = Bundle::new();
        for item in bundle
            .items
            .iter()
            .filter(|i| i.operation == BatchOperation::Delete)
        {
            let (Some(interceptor), Some(key)) =
                (self.interceptor_for(item), item.record().and_then(|r| r.key))
            else {
                continue;
            };
            cleanup.extend(interceptor.prepare_delete(key).await?);
        }

        if cleanup.is_empty() {
            return Ok(());
        }
        tracing::debug!(edges = cleanup.len(), "Removing duplicate edges of deleted records");
        self.state
            .store
            .persist(cleanup, TransactionMode::Commit, &Principal::system())
            .await?;
        Ok(())
    }
}
