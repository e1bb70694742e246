#[allow(unused)]
mod support;

use std::{sync::Arc, time::Duration};
use support::{clerk, key_of, patient, Harness, PATIENT, REVIEW_CONFIG};
use zunder_sim::{
    config::Config,
    jobs::{JobManager, JobSchedule, MATCH_JOB_ID},
    models::{MatchClassification, Principal},
    services::{InterceptorRegistry, MergeService, ResourceInterceptor, SimLifecycleService},
    Error,
};

fn config_for(types: &[&str]) -> Config {
    let mut config = Config::default();
    config.sim.resource_types = types.iter().map(|t| t.to_string()).collect();
    config.sim.match_workers = Some(1);
    config
}

#[tokio::test]
async fn start_subscribes_and_stop_unsubscribes() -> anyhow::Result<()> {
    let harness = Harness::new();
    let service = SimLifecycleService::new(config_for(&[PATIENT]), harness.state.clone());

    service.start()?;
    assert!(service.is_running());
    assert_eq!(service.managed_types(), vec![PATIENT.to_string()]);

    harness.store.insert(patient("1"), &clerk()).await?;
    let calls = harness.matcher.calls();
    assert!(calls > 0);

    service.stop()?;
    assert!(!service.is_running());
    harness.store.insert(patient("2"), &clerk()).await?;
    assert_eq!(harness.matcher.calls(), calls);
    Ok(())
}

#[tokio::test]
async fn merge_services_exist_only_for_managed_types() -> anyhow::Result<()> {
    let harness = Harness::new();
    let service = SimLifecycleService::new(config_for(&[PATIENT, "Person"]), harness.state.clone());
    assert!(service.merge_service(PATIENT).is_none());

    service.start()?;

    let patients = service.merge_service(PATIENT).expect("patient merge service");
    assert_eq!(patients.resource_type(), PATIENT);
    assert!(service.merge_service("Person").is_some());
    assert!(service.merge_service("Organization").is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_type_fails_start_without_subscribing() -> anyhow::Result<()> {
    let harness = Harness::new();
    let service =
        SimLifecycleService::new(config_for(&[PATIENT, "Spaceship"]), harness.state.clone());

    let err = service.start().unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert!(!service.is_running());
    assert!(!harness.jobs.is_registered(MATCH_JOB_ID));
    harness.store.insert(patient("1"), &clerk()).await?;
    assert_eq!(harness.matcher.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn hosts_can_register_extra_types() -> anyhow::Result<()> {
    let harness = Harness::new();
    let mut registry = InterceptorRegistry::empty();
    registry.register("Spaceship", Arc::new(ResourceInterceptor::new));

    let service = SimLifecycleService::with_registry(
        config_for(&["Spaceship"]),
        harness.state.clone(),
        registry,
    );

    service.start()?;
    assert!(service.interceptor("Spaceship").is_some());
    Ok(())
}

#[tokio::test]
async fn job_is_registered_once_with_configured_schedule() -> anyhow::Result<()> {
    let harness = Harness::new();
    let mut config = config_for(&[PATIENT]);
    config.sim.job.interval_minutes = Some(15);

    let first = SimLifecycleService::new(config.clone(), harness.state.clone());
    first.start()?;
    assert!(harness.jobs.is_registered(MATCH_JOB_ID));
    assert_eq!(
        harness.jobs.schedule_of(MATCH_JOB_ID),
        Some(JobSchedule::Interval(Duration::from_secs(15 * 60)))
    );

    // A second engine over the same job manager does not register again.
    let second = SimLifecycleService::new(config, harness.state.clone());
    second.start()?;
    assert_eq!(harness.jobs.registered_ids(), vec![MATCH_JOB_ID.to_string()]);
    Ok(())
}

#[tokio::test]
async fn disabled_job_is_not_registered() -> anyhow::Result<()> {
    let harness = Harness::new();
    let mut config = config_for(&[PATIENT]);
    config.sim.job.enabled = false;

    SimLifecycleService::new(config, harness.state.clone()).start()?;

    assert!(!harness.jobs.is_registered(MATCH_JOB_ID));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_job_redetects_candidates() -> anyhow::Result<()> {
    let harness = Harness::new();
    let service = SimLifecycleService::new(config_for(&[PATIENT]), harness.state.clone());
    let r = harness.seed(patient("1")).await?;
    let a = harness.seed(patient("2")).await?;
    service.start()?;

    harness
        .matcher
        .script(key_of(&r), REVIEW_CONFIG, &a, MatchClassification::Probable, 0.8);
    harness.jobs.run_now(MATCH_JOB_ID).await?;

    let patients = service.merge_service(PATIENT).expect("patient merge service");
    assert_eq!(
        patients
            .get_merge_candidate_keys(key_of(&r), &Principal::system())
            .await?,
        vec![key_of(&a)]
    );
    Ok(())
}
