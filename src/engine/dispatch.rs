//! Dispatch loop: claims tasks, runs them in a bounded pool of slots, and
//! settles their outcomes.
//!
//! The pool is an owned `JoinSet`; each slot executes one task and then
//! settles it (success path or retry handler) before finishing. The loop
//! itself only claims and collects.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, warn};

use crate::error::Result;
use crate::executor::ExecutorRegistry;
use crate::model::{State, TaskId};
use crate::queue::{Claim, ClaimedTask, Queue};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_task_span};

use super::reaper::truncate;
use super::retry::{RetryHandler, RetryPolicy, Settlement};

/// Configuration for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Tasks executing concurrently in this process.
    pub max_workers: usize,
    /// How long one claim blocks on an empty queue. Bounds shutdown latency.
    pub claim_timeout: Duration,
    /// First delay after a failed claim; doubles on each further failure.
    pub store_retry_min: Duration,
    pub store_retry_max: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            claim_timeout: Duration::from_secs(5),
            store_retry_min: Duration::from_millis(100),
            store_retry_max: Duration::from_secs(30),
        }
    }
}

/// What a finished slot hands back to the loop.
struct SlotReport {
    task_id: TaskId,
    task_type: String,
    result: Result<Settlement>,
}

pub struct DispatchLoop {
    queue: Queue,
    registry: Arc<ExecutorRegistry>,
    retry: RetryHandler,
    config: DispatchConfig,
    shutdown: watch::Receiver<bool>,
}

impl DispatchLoop {
    pub fn new(
        queue: Queue,
        registry: Arc<ExecutorRegistry>,
        policy: RetryPolicy,
        config: DispatchConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let retry = RetryHandler::new(queue.clone(), policy);
        Self {
            queue,
            registry,
            retry,
            config,
            shutdown,
        }
    }

    /// Run until shutdown is signalled, then drain outstanding slots.
    pub async fn run(mut self) {
        let mut slots: JoinSet<SlotReport> = JoinSet::new();
        let mut store_delay = self.config.store_retry_min;

        info!(max_workers = self.config.max_workers, "dispatch loop started");

        while !self.stopping() {
            // Fill free slots.
            while slots.len() < self.config.max_workers && !self.stopping() {
                match self.queue.claim(self.config.claim_timeout).await {
                    Ok(Some(Claim::Task(claimed))) => {
                        store_delay = self.config.store_retry_min;
                        self.spawn_slot(&mut slots, claimed);
                    }
                    Ok(Some(Claim::Malformed { raw, error })) => {
                        store_delay = self.config.store_retry_min;
                        self.drop_malformed(&raw, &error).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            retry_in_ms = store_delay.as_millis() as u64,
                            "claim failed: {e}"
                        );
                        self.pause(store_delay).await;
                        store_delay = (store_delay * 2).min(self.config.store_retry_max);
                        break;
                    }
                }
            }

            // Collect finished slots; with the pool full, wait for one.
            if slots.len() >= self.config.max_workers {
                tokio::select! {
                    joined = slots.join_next() => {
                        if let Some(joined) = joined {
                            record_slot(joined);
                        }
                    }
                    _ = self.shutdown.changed() => {}
                }
            }
            while let Some(joined) = slots.try_join_next() {
                record_slot(joined);
            }
        }

        info!(outstanding = slots.len(), "dispatch loop stopping, draining slots");
        while let Some(joined) = slots.join_next().await {
            record_slot(joined);
        }
        info!("dispatch loop stopped");
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Sleep, waking early on shutdown.
    async fn pause(&mut self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    fn spawn_slot(&self, slots: &mut JoinSet<SlotReport>, claimed: ClaimedTask) {
        let queue = self.queue.clone();
        let registry = Arc::clone(&self.registry);
        let retry = self.retry.clone();
        slots.spawn(run_slot(queue, registry, retry, claimed));
    }

    /// An unparseable record has no ID or retry count to work with, so it is
    /// removed rather than retried.
    async fn drop_malformed(&self, raw: &str, parse_error: &str) {
        error!(
            error = %parse_error,
            raw = %truncate(raw, 200),
            "dropping malformed task record"
        );
        metrics::malformed_dropped().add(1, &[KeyValue::new("source", "dispatch")]);
        if let Err(e) = self.queue.release(raw, None).await {
            warn!("could not drop malformed record, leaving it for the reaper: {e}");
        }
    }
}

async fn run_slot(
    queue: Queue,
    registry: Arc<ExecutorRegistry>,
    retry: RetryHandler,
    claimed: ClaimedTask,
) -> SlotReport {
    let task_id = claimed.task.id.clone();
    let task_type = claimed.task.task_type.clone();
    let span = start_task_span(&task_type, &task_id, claimed.task.retries + 1);

    let result = settle(&queue, &registry, &retry, &claimed, &span)
        .instrument(span.clone())
        .await;

    SlotReport {
        task_id,
        task_type,
        result,
    }
}

/// Execute a claimed task and move it out of the in-flight area.
async fn settle(
    queue: &Queue,
    registry: &ExecutorRegistry,
    retry: &RetryHandler,
    claimed: &ClaimedTask,
    span: &tracing::Span,
) -> Result<Settlement> {
    let task = &claimed.task;
    record_state_transition(span, State::Queued, State::InFlight);

    let outcome = registry.execute(task).await;
    metrics::execution_duration_ms().record(
        outcome.duration_ms as f64,
        &[KeyValue::new("task_type", task.task_type.clone())],
    );

    if outcome.is_success() {
        info!(
            duration_ms = outcome.duration_ms,
            output = %truncate(&outcome.output, 200),
            "task succeeded"
        );
        queue.complete(claimed, &outcome).await?;
        record_state_transition(span, State::InFlight, State::Completed);
        return Ok(Settlement::Completed);
    }

    warn!(
        code = outcome.code,
        failure = ?outcome.failure,
        output = %truncate(&outcome.output, 200),
        "task failed"
    );
    let settlement = retry.handle(claimed, &outcome).await?;
    let to = match settlement {
        Settlement::Dead { .. } => State::Dead,
        _ => State::Requeued,
    };
    record_state_transition(span, State::InFlight, to);
    Ok(settlement)
}

fn record_slot(joined: std::result::Result<SlotReport, JoinError>) {
    let report = match joined {
        Ok(report) => report,
        Err(e) => {
            error!("task slot panicked, leaving its task for the reaper: {e}");
            return;
        }
    };

    let result = match &report.result {
        Ok(settlement) => {
            debug!(task_id = %report.task_id, settlement = settlement.label(), "slot finished");
            settlement.label()
        }
        Err(e) => {
            error!(
                task_id = %report.task_id,
                "failed to settle task, leaving it for the reaper: {e}"
            );
            "error"
        }
    };
    metrics::task_settlements().add(
        1,
        &[
            KeyValue::new("task_type", report.task_type),
            KeyValue::new("result", result),
        ],
    );
}
