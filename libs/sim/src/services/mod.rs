//! Interception, merge and bulk-matching services

pub mod bundle_interceptor;
pub mod interceptor;
pub mod lifecycle;
pub mod merge;
mod merge_service;
pub mod runner;

pub use bundle_interceptor::BundleInterceptor;
pub use interceptor::ResourceInterceptor;
pub use lifecycle::{InterceptorFactory, InterceptorRegistry, SimLifecycleService, BUILTIN_RESOURCE_TYPES};
pub use merge_service::MergeService;
pub use runner::{BatchProcessor, MatchRunner, BATCH_SIZE};
