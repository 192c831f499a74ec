//! Task scheduling with a bounded whole-invocation retry.
//!
//! Each scheduled [`DrainJob`] runs as an independent Tokio task. A failed
//! invocation is retried after [`RetryPolicy::retry_delay`] until
//! [`RetryPolicy::max_attempts`] is reached; after that the failure is
//! terminal and whatever remains queued waits for the next invocation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::{DrainJob, DrainReport, DrainWorker, WorkerError};

/// Whole-invocation retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 mean 1.
    pub max_attempts: u32,
    /// Pause before each retry.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Run `operation` under `policy`, returning the first success or the last
/// error.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                warn!(label, attempt, max_attempts, error = %e, "attempt failed, retrying");
                tokio::time::sleep(policy.retry_delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => {
                error!(label, attempt, error = %e, "giving up");
                return Err(e);
            }
        }
    }
}

/// Spawns drain invocations with retries.
#[derive(Debug, Clone)]
pub struct Scheduler {
    worker: Arc<DrainWorker>,
    policy: RetryPolicy,
}

impl Scheduler {
    /// Create a scheduler for `worker`.
    pub fn new(worker: Arc<DrainWorker>, policy: RetryPolicy) -> Self {
        Self { worker, policy }
    }

    /// Spawn a drain invocation on its own task.
    pub fn schedule(&self, job: DrainJob) -> JoinHandle<Result<DrainReport, WorkerError>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(&job).await })
    }

    /// Run a drain invocation on the current task.
    ///
    /// # Errors
    ///
    /// Returns the last [`WorkerError`] once all attempts have failed.
    pub async fn run(&self, job: &DrainJob) -> Result<DrainReport, WorkerError> {
        let label = job.to_string();
        let worker = self.worker.as_ref();
        run_with_retry(self.policy, &label, || worker.perform(job)).await
    }
}
