//! Job Reliability Wrapper
//!
//! Every periodic task runs through this wrapper: bounded retries with a
//! fixed delay, one operator escalation when retries are exhausted, and the
//! error swallowed so a permanently failing job can never crash or halt the
//! scheduling loop. Non-retryable errors escalate without burning retries.
//! Each invocation gets a fresh retry counter.

use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::feeds::{Audience, Notifier};

/// Retry configuration for one wrapped job
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub job_name: String,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(job_name: &str, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            job_name: job_name.to_string(),
            max_retries,
            retry_delay,
        }
    }
}

/// A schedulable unit of work
pub type JobTask = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Per-job counters for the operator surface
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct JobCounters {
    /// Completed invocations (each may span several attempts)
    pub runs: u64,
    pub successes: u64,
    /// Failed attempts, across all invocations
    pub failed_attempts: u64,
    /// Invocations that exhausted retries
    pub escalations: u64,
}

/// Shared registry of counters keyed by job name
#[derive(Default)]
pub struct JobStatsRegistry {
    counters: RwLock<HashMap<String, JobCounters>>,
}

impl JobStatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_name: &str) -> JobCounters {
        self.counters
            .read()
            .expect("job stats lock poisoned")
            .get(job_name)
            .copied()
            .unwrap_or_default()
    }

    pub fn all(&self) -> HashMap<String, JobCounters> {
        self.counters.read().expect("job stats lock poisoned").clone()
    }

    fn update(&self, job_name: &str, f: impl FnOnce(&mut JobCounters)) {
        let mut counters = self.counters.write().expect("job stats lock poisoned");
        f(counters.entry(job_name.to_string()).or_default());
    }
}

/// Runs wrapped jobs and keeps their counters
#[derive(Clone)]
pub struct JobRunner {
    notifier: Arc<dyn Notifier>,
    stats: Arc<JobStatsRegistry>,
}

impl JobRunner {
    pub fn new(notifier: Arc<dyn Notifier>, stats: Arc<JobStatsRegistry>) -> Self {
        Self { notifier, stats }
    }

    pub fn stats(&self) -> &JobStatsRegistry {
        &self.stats
    }

    /// Run one invocation of a task under the retry policy. Never returns an
    /// error: exhaustion escalates to the operator channel and is swallowed.
    pub async fn run_guarded(&self, policy: &RetryPolicy, task: &JobTask) {
        self.stats.update(&policy.job_name, |c| c.runs += 1);

        let attempts = policy.max_retries + 1;
        let mut last_error = String::new();
        let mut attempts_made = 0;

        for attempt in 1..=attempts {
            attempts_made = attempt;
            match task().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(job = %policy.job_name, attempt, "job recovered after retry");
                    }
                    self.stats.update(&policy.job_name, |c| c.successes += 1);
                    return;
                }
                Err(e) => {
                    self.stats.update(&policy.job_name, |c| c.failed_attempts += 1);
                    warn!(
                        job = %policy.job_name,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "job attempt failed"
                    );
                    last_error = e.to_string();
                    // Validation and not-found errors cannot succeed on a
                    // rerun; skip straight to escalation
                    if !e.is_retryable() {
                        break;
                    }
                    if attempt < attempts {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        // Retries exhausted: escalate once, swallow the error, move on
        self.stats.update(&policy.job_name, |c| c.escalations += 1);
        error!(job = %policy.job_name, error = %last_error, "job exhausted retries");
        self.notifier
            .notify(
                Audience::Operator,
                &format!(
                    "job '{}' failed after {} attempts: {}",
                    policy.job_name, attempts_made, last_error
                ),
            )
            .await;
    }

    /// Spawn a periodic task. The guarded run swallows every failure, so the
    /// interval loop survives any outcome.
    pub fn spawn_periodic(
        &self,
        period: Duration,
        policy: RetryPolicy,
        task: JobTask,
    ) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; run the job on schedule
            interval.tick().await;
            loop {
                interval.tick().await;
                runner.run_guarded(&policy, &task).await;
            }
        })
    }
}
