//! Asynchronous retraining queue.
//!
//! Triggers enqueue a job id on a channel and return at once. A single
//! worker task takes ids in FIFO order and runs each job on the blocking
//! pool, so at most one retrain runs at a time. Job records live in a
//! shared registry that the status endpoint reads.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use classifier_structs::{ClassifierError, ClassifierResult, RetrainJob};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::retrain::{RetrainRunner, apply_progress, finish};

type JobRegistry = Arc<DashMap<Uuid, RetrainJob>>;

const WORKER_STOPPED: &str = "retraining worker is not running";

/// Finished jobs nobody polls are kept this many retention windows.
const UNOBSERVED_RETENTION_FACTOR: u32 = 4;

/// Registry of retraining jobs plus the submission side of the worker.
pub struct JobQueue {
    jobs: JobRegistry,
    sender: mpsc::UnboundedSender<Uuid>,
    retention: Duration,
}

impl JobQueue {
    /// Spawns the worker on the current tokio runtime.
    ///
    /// `retention` is how long a finished job stays queryable after a
    /// client has seen its result. Finished jobs no client ever reads are
    /// dropped after several windows.
    #[must_use]
    pub fn start(runner: Arc<RetrainRunner>, retention: Duration) -> Self {
        let jobs: JobRegistry = Arc::new(DashMap::new());
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(runner, Arc::clone(&jobs), receiver));
        Self {
            jobs,
            sender,
            retention,
        }
    }

    /// Queues a new job and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `TrainingFailure` if the worker has stopped.
    pub fn submit(&self) -> ClassifierResult<Uuid> {
        self.sweep();

        let id = Uuid::new_v4();
        self.jobs.insert(id, RetrainJob::new(id));

        if self.sender.send(id).is_err() {
            let stopped = || ClassifierError::TrainingFailure(WORKER_STOPPED.to_string());
            if let Some(mut job) = self.jobs.get_mut(&id) {
                finish(&mut job, Err(stopped()));
            }
            return Err(stopped());
        }

        info!(job_id = %id, queued = self.jobs.len(), "Retraining job queued");
        Ok(id)
    }

    /// Returns a snapshot of a job.
    ///
    /// Reading a finished job marks it observed, which starts its retention
    /// window.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<RetrainJob> {
        self.sweep();

        let mut job = self.jobs.get_mut(&id)?;
        if job.state.is_terminal() && job.observed_at.is_none() {
            job.observed_at = Some(Utc::now());
        }
        Some(job.clone())
    }

    /// Drops finished jobs whose retention has run out.
    ///
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !is_expired(job, now, self.retention));
        let removed = before.saturating_sub(self.jobs.len());
        if removed > 0 {
            debug!(removed, "Swept finished retraining jobs");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn is_expired(job: &RetrainJob, now: DateTime<Utc>, retention: Duration) -> bool {
    if !job.state.is_terminal() {
        return false;
    }
    let (since, window) = match job.observed_at {
        Some(observed) => (observed, retention),
        None => (
            job.updated_at,
            retention.saturating_mul(UNOBSERVED_RETENTION_FACTOR),
        ),
    };
    (now - since).to_std().is_ok_and(|age| age > window)
}

async fn run_worker(
    runner: Arc<RetrainRunner>,
    jobs: JobRegistry,
    mut receiver: mpsc::UnboundedReceiver<Uuid>,
) {
    while let Some(id) = receiver.recv().await {
        info!(job_id = %id, "Retraining job started");

        let blocking_runner = Arc::clone(&runner);
        let progress_jobs = Arc::clone(&jobs);
        let result = tokio::task::spawn_blocking(move || {
            blocking_runner.run(&mut |update| {
                if let Some(mut job) = progress_jobs.get_mut(&id) {
                    apply_progress(&mut job, update);
                }
            })
        })
        .await
        .unwrap_or_else(|join_error| {
            warn!(job_id = %id, %join_error, "Retraining task aborted");
            Err(ClassifierError::TrainingFailure(format!(
                "training task aborted: {join_error}"
            )))
        });

        if let Some(mut job) = jobs.get_mut(&id) {
            finish(&mut job, result);
        }
    }
    debug!("Retraining worker stopped");
}
