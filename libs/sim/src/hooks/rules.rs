//! Business-rule hooks run around every bundle the engine commits

use crate::{models::Bundle, Result};
use async_trait::async_trait;

/// Business rules applied to bundles before and after they are committed.
///
/// Failures propagate to the caller; the engine never retries them.
#[async_trait]
pub trait BusinessRules: Send + Sync {
    async fn before_insert(&self, bundle: Bundle) -> Result<Bundle> {
        Ok(bundle)
    }

    async fn after_insert(&self, bundle: Bundle) -> Result<Bundle> {
        Ok(bundle)
    }

    async fn before_update(&self, bundle: Bundle) -> Result<Bundle> {
        Ok(bundle)
    }

    async fn after_update(&self, bundle: Bundle) -> Result<Bundle> {
        Ok(bundle)
    }
}

/// Pass-through rules for deployments without a rules engine
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBusinessRules;

#[async_trait]
impl BusinessRules for NoBusinessRules {}
