//! Bulk background matching session
//!
//! A fixed pool of worker tasks drains a bounded queue of records fed by a
//! single loader. Backpressure uses two primitives:
//! - a bounded channel (`BATCH_SIZE` x workers) carrying submitted records
//! - a semaphore whose available permits are the idle workers
//!
//! The load gate is open while at least one worker is idle. A worker claims an
//! idle permit when it takes a batch and returns it once the batch is done, so
//! the loader stalls whenever every worker is busy.
//!
//! The first fault raised by a worker halts the session. It is stored once and
//! returned unchanged from every later `submit` and `drain`.

use crate::{models::Record, Error, Result};
use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, error::SendTimeoutError},
        Mutex, Semaphore,
    },
    task::JoinHandle,
    time::{sleep, timeout},
};

/// Maximum records a worker takes per batch
pub const BATCH_SIZE: usize = 16;
const GATE_TIMEOUT: Duration = Duration::from_secs(1);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-batch work done by the session's workers
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process_batch(&self, batch: Vec<Record>) -> Result<()>;
}

/// Worker count for a bulk session: one on single-node deployments, otherwise
/// roughly a quarter of the available CPUs.
pub fn recommended_worker_count(single_node: bool, available_cpus: usize) -> usize {
    if single_node {
        1
    } else {
        (available_cpus / 4).max(1)
    }
}

struct Session {
    worker_count: usize,
    idle: Semaphore,
    queue: Mutex<mpsc::Receiver<Record>>,
    queued: AtomicUsize,
    processed: AtomicU64,
    running: AtomicBool,
    fault: OnceLock<Error>,
}

impl Session {
    fn fault(&self) -> Option<Error> {
        self.fault.get().cloned()
    }

    fn halt(&self, error: Error) {
        if self.fault.set(error.clone()).is_ok() {
            tracing::warn!(error = %error, "Match session halted");
        }
    }

    fn should_run(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.fault.get().is_none()
    }

    /// Take up to `BATCH_SIZE` records. On success the caller owns one idle
    /// permit until it calls `release_worker`.
    async fn try_take_batch(&self, buf: &mut Vec<Record>) -> bool {
        let Ok(mut queue) = timeout(GATE_TIMEOUT, self.queue.lock()).await else {
            return false;
        };
        let taken = timeout(GATE_TIMEOUT, queue.recv_many(buf, BATCH_SIZE))
            .await
            .unwrap_or(0);
        drop(queue);

        if taken == 0 {
            return false;
        }

        // Claim the idle slot before the records leave the queued count, so
        // drain never sees an empty queue with every worker idle mid-batch.
        match self.idle.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => {
                self.halt(Error::Internal("Match session gate closed".to_string()));
                return false;
            }
        }
        self.queued.fetch_sub(taken, Ordering::SeqCst);
        true
    }

    fn release_worker(&self, processed: usize) {
        self.processed.fetch_add(processed as u64, Ordering::SeqCst);
        self.idle.add_permits(1);
    }
}

async fn run_worker(session: Arc<Session>, processor: Arc<dyn BatchProcessor>, worker: usize) {
    tracing::debug!(worker, "Match worker started");
    let mut buf = Vec::with_capacity(BATCH_SIZE);

    while session.should_run() {
        if !session.try_take_batch(&mut buf).await {
            continue;
        }

        let batch: Vec<Record> = buf.drain(..).collect();
        let count = batch.len();
        if let Err(e) = processor.process_batch(batch).await {
            tracing::error!(worker, error = %e, "Match worker failed");
            session.halt(e);
        }
        session.release_worker(count);
    }

    tracing::debug!(worker, "Match worker stopped");
}

/// A running bulk match session
pub struct MatchRunner {
    session: Arc<Session>,
    sender: mpsc::Sender<Record>,
    workers: Vec<JoinHandle<()>>,
    submitted: AtomicU64,
}

impl MatchRunner {
    /// Launch `worker_count` workers (at least one) that feed batches to `processor`.
    pub fn start(worker_count: usize, processor: Arc<dyn BatchProcessor>) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel(BATCH_SIZE * worker_count);
        let session = Arc::new(Session {
            worker_count,
            idle: Semaphore::new(worker_count),
            queue: Mutex::new(receiver),
            queued: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            running: AtomicBool::new(true),
            fault: OnceLock::new(),
        });

        let workers = (0..worker_count)
            .map(|worker| tokio::spawn(run_worker(session.clone(), processor.clone(), worker)))
            .collect();

        tracing::info!(worker_count, "Match session started");

        Self {
            session,
            sender,
            workers,
            submitted: AtomicU64::new(0),
        }
    }

    /// Queue one record for matching.
    ///
    /// Waits in one-second slices for the load gate to open, re-checking for a
    /// halt between slices. Returns the stored fault as soon as the session is halted.
    pub async fn submit(&self, record: Record) -> Result<()> {
        loop {
            if let Some(fault) = self.session.fault() {
                return Err(fault);
            }
            if !self.session.running.load(Ordering::SeqCst) {
                return Err(Error::Internal("Match session is stopped".to_string()));
            }
            match timeout(GATE_TIMEOUT, self.session.idle.acquire()).await {
                Ok(Ok(_open)) => break,
                Ok(Err(_)) => {
                    return Err(Error::Internal("Match session gate closed".to_string()));
                }
                Err(_) => continue,
            }
        }

        self.session.queued.fetch_add(1, Ordering::SeqCst);
        let mut pending = record;
        loop {
            match self.sender.send_timeout(pending, GATE_TIMEOUT).await {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if let Some(fault) = self.session.fault() {
                        self.session.queued.fetch_sub(1, Ordering::SeqCst);
                        return Err(fault);
                    }
                    pending = returned;
                }
                Err(SendTimeoutError::Closed(_)) => {
                    self.session.queued.fetch_sub(1, Ordering::SeqCst);
                    return Err(Error::Internal("Match session queue closed".to_string()));
                }
            }
        }

        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Record a fault. The first fault wins; later ones are dropped.
    pub fn halt(&self, error: Error) {
        self.session.halt(error);
    }

    /// Wait until every submitted record has been processed, or the session halts.
    pub async fn drain(&self) -> Result<()> {
        loop {
            if let Some(fault) = self.session.fault() {
                return Err(fault);
            }
            if self.idle_workers() == self.session.worker_count
                && self.session.queued.load(Ordering::SeqCst) == 0
            {
                // A worker records its fault before returning its idle slot.
                return match self.session.fault() {
                    Some(fault) => Err(fault),
                    None => Ok(()),
                };
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Stop the workers and wait for them to exit. A batch in flight finishes first.
    pub async fn shutdown(&mut self) {
        self.session.running.store(false, Ordering::SeqCst);
        for handle in std::mem::take(&mut self.workers) {
            if let Err(e) = handle.await {
                tracing::error!("Match worker task join error: {}", e);
            }
        }
        self.session.idle.close();
        tracing::info!(
            submitted = self.submitted(),
            processed = self.processed(),
            "Match session stopped"
        );
    }

    pub fn worker_count(&self) -> usize {
        self.session.worker_count
    }

    pub fn idle_workers(&self) -> usize {
        self.session.idle.available_permits()
    }

    /// Whether the loader may add more work
    pub fn is_load_gate_open(&self) -> bool {
        self.idle_workers() > 0
    }

    pub fn processed(&self) -> u64 {
        self.session.processed.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn fault(&self) -> Option<Error> {
        self.session.fault()
    }
}

impl Drop for MatchRunner {
    fn drop(&mut self) {
        self.session.running.store(false, Ordering::SeqCst);
    }
}
