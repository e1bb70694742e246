//! In-process job manager
//!
//! Keeps registrations in memory and runs due jobs from a polling task.
//! Primary use-case: embedding the engine without an external scheduler.

use super::{Job, JobManager, JobSchedule};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};

struct Registration {
    job: Arc<dyn Job>,
    schedule: JobSchedule,
    next_run: DateTime<Utc>,
}

#[derive(Default)]
pub struct InProcessJobManager {
    jobs: Mutex<HashMap<String, Registration>>,
}

impl InProcessJobManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.jobs.lock() {
            Ok(jobs) => jobs.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort();
        ids
    }

    pub fn schedule_of(&self, job_id: &str) -> Option<JobSchedule> {
        self.jobs.lock().ok()?.get(job_id).map(|r| r.schedule)
    }

    pub fn next_run_of(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.jobs.lock().ok()?.get(job_id).map(|r| r.next_run)
    }

    /// Run a registered job immediately, outside its schedule
    pub async fn run_now(&self, job_id: &str) -> Result<()> {
        let job = self
            .jobs
            .lock()?
            .get(job_id)
            .map(|r| r.job.clone())
            .ok_or_else(|| Error::Scheduler(format!("Job '{}' is not registered", job_id)))?;
        run_job(job).await
    }

    /// Run every job whose next run is at or before `now` and reschedule it.
    /// Failures are logged; a failing job still gets its next slot.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due: Vec<Arc<dyn Job>> = {
            let mut jobs = self.jobs.lock()?;
            jobs.values_mut()
                .filter(|r| r.next_run <= now)
                .map(|r| {
                    r.next_run = r.schedule.next_run_after(now);
                    r.job.clone()
                })
                .collect()
        };

        let count = due.len();
        for job in due {
            if let Err(e) = run_job(job.clone()).await {
                tracing::error!(job_id = job.id(), error = %e, "Scheduled job failed");
            }
        }
        Ok(count)
    }

    /// Poll for due jobs until `shutdown` flips to true.
    pub fn spawn(
        self: Arc<Self>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                poll_interval_ms = poll_interval.as_millis() as u64,
                "Job manager started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {
                        if let Err(e) = self.run_due(Utc::now()).await {
                            tracing::error!(error = %e, "Job poll failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Job manager stopped");
        })
    }
}

async fn run_job(job: Arc<dyn Job>) -> Result<()> {
    tracing::info!(job_id = job.id(), job_name = job.name(), "Running job");
    let started = std::time::Instant::now();
    job.run().await?;
    tracing::info!(
        job_id = job.id(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Job completed"
    );
    Ok(())
}

impl JobManager for InProcessJobManager {
    fn is_registered(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .map(|jobs| jobs.contains_key(job_id))
            .unwrap_or(false)
    }

    fn add_job(&self, job: Arc<dyn Job>, schedule: JobSchedule) -> Result<()> {
        let id = job.id().to_string();
        let mut jobs = self.jobs.lock()?;
        if jobs.contains_key(&id) {
            return Err(Error::Scheduler(format!("Job '{}' is already registered", id)));
        }
        let next_run = schedule.next_run_after(Utc::now());
        tracing::info!(job_id = %id, next_run = %next_run, "Job registered");
        jobs.insert(
            id,
            Registration {
                job,
                schedule,
                next_run,
            },
        );
        Ok(())
    }
}
