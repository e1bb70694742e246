//! Lifecycle hooks called synchronously by the persistence layer
//!
//! Instead of multicast events, the persistence layer calls every subscribed
//! [`PersistenceHook`] in subscription order before (or after) a write and acts
//! on the returned [`WriteDecision`]. The first hook that handles a write wins;
//! the persistence layer then skips its own default write.

mod rules;

pub use rules::{BusinessRules, NoBusinessRules};

use crate::{
    models::{Bundle, Principal, Record},
    Result,
};
use async_trait::async_trait;
use uuid::Uuid;

/// What the persistence layer should do with the write it is about to perform
#[derive(Debug, Clone, PartialEq)]
pub enum WriteDecision {
    /// Perform the original write unchanged
    Proceed,
    /// The hook already committed a replacement bundle; cancel the original write
    Handled(Bundle),
}

#[async_trait]
pub trait PersistenceHook: Send + Sync {
    fn name(&self) -> &str;

    /// A record is about to be created
    async fn on_inserting(&self, _record: &mut Record, _principal: &Principal) -> Result<WriteDecision> {
        Ok(WriteDecision::Proceed)
    }

    /// A record is about to be updated
    async fn on_updating(&self, _record: &mut Record, _principal: &Principal) -> Result<WriteDecision> {
        Ok(WriteDecision::Proceed)
    }

    /// A record was deleted
    async fn on_deleted(&self, _record: &Record, _principal: &Principal) -> Result<()> {
        Ok(())
    }

    /// A multi-record bundle is about to be committed
    async fn on_bundle_saving(&self, _bundle: &Bundle, _principal: &Principal) -> Result<WriteDecision> {
        Ok(WriteDecision::Proceed)
    }

    /// A committed bundle contained deletes
    async fn on_bundle_deleted(&self, _bundle: &Bundle, _principal: &Principal) -> Result<()> {
        Ok(())
    }
}

/// Handle returned by [`HookRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookSubscription(pub Uuid);

/// Resource type under which bundle-level hooks subscribe
pub const BUNDLE_RESOURCE_TYPE: &str = "Bundle";

/// Subscription point exposed by the persistence layer
pub trait HookRegistry: Send + Sync {
    fn subscribe(
        &self,
        resource_type: &str,
        hook: std::sync::Arc<dyn PersistenceHook>,
    ) -> Result<HookSubscription>;

    fn unsubscribe(&self, subscription: HookSubscription) -> Result<()>;
}
