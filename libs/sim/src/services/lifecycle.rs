//! Start/stop of the single-instance-mode engine
//!
//! Starting builds one `ResourceInterceptor` per configured type, subscribes
//! it and a shared `BundleInterceptor` to the persistence layer, and registers
//! the periodic candidate re-detection job. Stopping unsubscribes everything
//! in reverse order.

use crate::{
    config::Config,
    hooks::{HookSubscription, BUNDLE_RESOURCE_TYPE},
    jobs::{MatchCandidatesJob, MATCH_JOB_ID},
    services::{BundleInterceptor, MergeService, ResourceInterceptor},
    state::{MatchSettings, SimState},
    Error, Result,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Builds the interceptor for one resource type
pub type InterceptorFactory =
    Arc<dyn Fn(&str, SimState, MatchSettings) -> ResourceInterceptor + Send + Sync>;

/// Clinical types that can be managed without host registration
pub const BUILTIN_RESOURCE_TYPES: &[&str] = &[
    "Patient",
    "Person",
    "Provider",
    "Organization",
    "Place",
    "Material",
    "ManufacturedMaterial",
    "Act",
    "Observation",
    "SubstanceAdministration",
    "Procedure",
];

/// Maps a configured type name to the factory for its interceptor
pub struct InterceptorRegistry {
    factories: HashMap<String, InterceptorFactory>,
}

impl InterceptorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtin_types() -> Self {
        let mut registry = Self::empty();
        for resource_type in BUILTIN_RESOURCE_TYPES {
            registry.register(resource_type, Arc::new(ResourceInterceptor::new));
        }
        registry
    }

    /// Add or replace the factory for `resource_type`
    pub fn register(&mut self, resource_type: &str, factory: InterceptorFactory) {
        self.factories.insert(resource_type.to_string(), factory);
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.factories.contains_key(resource_type)
    }

    pub fn create(
        &self,
        resource_type: &str,
        state: SimState,
        settings: MatchSettings,
    ) -> Result<ResourceInterceptor> {
        let factory = self.factories.get(resource_type).ok_or_else(|| {
            Error::Configuration(format!(
                "No interceptor is registered for resource type '{}'",
                resource_type
            ))
        })?;
        Ok(factory(resource_type, state, settings))
    }
}

impl Default for InterceptorRegistry {
    fn default() -> Self {
        Self::with_builtin_types()
    }
}

struct Running {
    interceptors: Vec<(Arc<ResourceInterceptor>, HookSubscription)>,
    bundle: HookSubscription,
}

pub struct SimLifecycleService {
    config: Config,
    state: SimState,
    registry: InterceptorRegistry,
    running: Mutex<Option<Running>>,
}

impl SimLifecycleService {
    pub fn new(config: Config, state: SimState) -> Self {
        Self::with_registry(config, state, InterceptorRegistry::with_builtin_types())
    }

    pub fn with_registry(config: Config, state: SimState, registry: InterceptorRegistry) -> Self {
        Self {
            config,
            state,
            registry,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    /// Subscribe the interceptors and register the re-detection job.
    ///
    /// Nothing stays subscribed when start fails. Starting twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock()?;
        if running.is_some() {
            tracing::debug!("Single instance mode already running");
            return Ok(());
        }

        self.config.validate()?;
        let settings = self.config.match_settings();
        let interceptors = self
            .config
            .sim
            .resource_types
            .iter()
            .map(|t| {
                self.registry
                    .create(t.trim(), self.state.clone(), settings)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut subscribed: Vec<(Arc<ResourceInterceptor>, HookSubscription)> = Vec::new();
        for interceptor in &interceptors {
            match self
                .state
                .hooks
                .subscribe(interceptor.resource_type(), interceptor.clone())
            {
                Ok(subscription) => subscribed.push((interceptor.clone(), subscription)),
                Err(e) => {
                    self.rollback(subscribed.iter().map(|(_, s)| *s));
                    return Err(e);
                }
            }
        }

        let bundle_interceptor = Arc::new(BundleInterceptor::new(
            interceptors.iter().map(|i| (**i).clone()),
            self.state.clone(),
        ));
        let bundle = match self
            .state
            .hooks
            .subscribe(BUNDLE_RESOURCE_TYPE, bundle_interceptor)
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.rollback(subscribed.iter().map(|(_, s)| *s));
                return Err(e);
            }
        };

        if let Err(e) = self.register_job(&subscribed) {
            self.rollback(
                subscribed
                    .iter()
                    .map(|(_, s)| *s)
                    .chain(std::iter::once(bundle)),
            );
            return Err(e);
        }

        tracing::info!(
            resource_types = ?self.config.sim.resource_types,
            "Single instance mode started"
        );
        *running = Some(Running {
            interceptors: subscribed,
            bundle,
        });
        Ok(())
    }

    fn register_job(&self, interceptors: &[(Arc<ResourceInterceptor>, HookSubscription)]) -> Result<()> {
        let job_config = &self.config.sim.job;
        if !job_config.enabled {
            tracing::debug!("Candidate re-detection job disabled");
            return Ok(());
        }
        if self.state.jobs.is_registered(MATCH_JOB_ID) {
            tracing::debug!(job_id = MATCH_JOB_ID, "Candidate re-detection job already registered");
            return Ok(());
        }

        let services: Vec<Arc<dyn MergeService>> = interceptors
            .iter()
            .map(|(i, _)| i.clone() as Arc<dyn MergeService>)
            .collect();
        let job = MatchCandidatesJob::new(services, job_config.clear_existing);
        self.state
            .jobs
            .add_job(Arc::new(job), job_config.schedule()?)
    }

    /// Unsubscribe in reverse order of subscription, logging failures
    fn rollback(&self, subscriptions: impl DoubleEndedIterator<Item = HookSubscription>) {
        for subscription in subscriptions.rev() {
            if let Err(e) = self.state.hooks.unsubscribe(subscription) {
                tracing::warn!(error = %e, "Failed to unsubscribe interceptor");
            }
        }
    }

    /// Unsubscribe every interceptor. The registered job is left to the job manager.
    pub fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock()?.take() else {
            return Ok(());
        };

        self.rollback(
            running
                .interceptors
                .iter()
                .map(|(_, s)| *s)
                .chain(std::iter::once(running.bundle)),
        );
        tracing::info!("Single instance mode stopped");
        Ok(())
    }

    /// The merge surface of a running interceptor
    pub fn merge_service(&self, resource_type: &str) -> Option<Arc<dyn MergeService>> {
        self.interceptor(resource_type)
            .map(|i| i as Arc<dyn MergeService>)
    }

    pub fn interceptor(&self, resource_type: &str) -> Option<Arc<ResourceInterceptor>> {
        let running = self.running.lock().ok()?;
        running
            .as_ref()?
            .interceptors
            .iter()
            .find(|(i, _)| i.resource_type() == resource_type)
            .map(|(i, _)| i.clone())
    }

    pub fn managed_types(&self) -> Vec<String> {
        match self.running.lock() {
            Ok(running) => running
                .as_ref()
                .map(|r| {
                    r.interceptors
                        .iter()
                        .map(|(i, _)| i.resource_type().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for SimLifecycleService {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Failed to stop single instance mode");
        }
    }
}
