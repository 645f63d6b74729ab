//! Failure handling: requeue with bounded exponential backoff, or dead-letter.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;
use crate::model::Outcome;
use crate::queue::{ClaimedTask, Queue};

/// Backoff between retries of the same task: `min(base ^ retries, cap)` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: f64,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: 1.5,
            cap: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: f64, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before requeueing a task that has now failed `retries` times.
    pub fn delay_for(&self, retries: u32) -> Duration {
        let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
        let secs = self.base.powi(exponent);
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// How a claimed task left the in-flight area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Succeeded, result recorded.
    Completed,
    /// Failed with budget left; back on the main queue after `backoff`.
    Requeued { retries: u32, backoff: Duration },
    /// Failed with the budget spent; moved to the dead-letter area.
    Dead { retries: u32 },
}

impl Settlement {
    pub fn label(&self) -> &'static str {
        match self {
            Settlement::Completed => "completed",
            Settlement::Requeued { .. } => "requeued",
            Settlement::Dead { .. } => "dead",
        }
    }
}

/// Decides between requeue and dead-letter for a failed attempt.
#[derive(Clone)]
pub struct RetryHandler {
    queue: Queue,
    policy: RetryPolicy,
}

impl RetryHandler {
    pub fn new(queue: Queue, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    /// Count the failure, then requeue or dead-letter the task.
    ///
    /// The backoff sleep happens here, inside the caller's slot, so a
    /// failing task throttles only the slot that ran it.
    pub async fn handle(&self, claimed: &ClaimedTask, outcome: &Outcome) -> Result<Settlement> {
        let mut task = claimed.task.clone();
        task.retries = task.retries.saturating_add(1);

        if task.is_exhausted() {
            warn!(
                task_id = %task.id,
                retries = task.retries,
                max_retries = task.max_retries,
                code = outcome.code,
                output = %outcome.output,
                "retry budget exhausted, dead-lettering"
            );
            self.queue.dead_letter(&claimed.raw, &task).await?;
            return Ok(Settlement::Dead {
                retries: task.retries,
            });
        }

        let backoff = self.policy.delay_for(task.retries);
        info!(
            task_id = %task.id,
            attempt = task.retries,
            max_retries = task.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            code = outcome.code,
            "task failed, retrying after backoff"
        );
        tokio::time::sleep(backoff).await;

        self.queue.requeue(&claimed.raw, &task).await?;
        Ok(Settlement::Requeued {
            retries: task.retries,
            backoff,
        })
    }
}
