//! Queue areas and the operations that move tasks between them.
//!
//! Four sequences live under a common key prefix:
//!
//! - `{prefix}:tasks`: main queue, pending work
//! - `{prefix}:processing`: in-flight area, claimed but unconfirmed
//! - `{prefix}:dead`: tasks whose retry budget ran out
//! - `{prefix}:results`: outcome records of successful tasks
//!
//! plus one `{prefix}:meta:{id}` map per in-flight task holding `popped_at`.
//!
//! Every operation here is a short sequence of independent store calls. A
//! crash between two calls can leave an in-flight entry behind; the reaper
//! is what eventually returns it to circulation. Cleanup calls tolerate
//! entries that are already gone, since the reaper and a worker may race
//! to settle the same task.

pub mod producer;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Outcome, Task, TaskId, TaskResult, from_epoch_seconds, to_epoch_seconds};
use crate::store::Store;
use crate::telemetry::metrics;

pub use producer::Producer;

/// Metadata field holding the claim time, in float epoch seconds.
const POPPED_AT: &str = "popped_at";

/// Store keys for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub main: String,
    pub in_flight: String,
    pub dead: String,
    pub results: String,
    meta_prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            main: format!("{prefix}:tasks"),
            in_flight: format!("{prefix}:processing"),
            dead: format!("{prefix}:dead"),
            results: format!("{prefix}:results"),
            meta_prefix: format!("{prefix}:meta:"),
        }
    }

    /// Key of the metadata map for an in-flight task.
    pub fn meta(&self, id: &TaskId) -> String {
        format!("{}{}", self.meta_prefix, id)
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self::new("beseri")
    }
}

/// What a claim pulled out of the main queue.
#[derive(Debug, Clone)]
pub enum Claim {
    /// A well-formed task, now in flight with metadata stamped.
    Task(ClaimedTask),
    /// A blob that does not parse as a task. It sits in the in-flight area
    /// without metadata until the caller drops it.
    Malformed { raw: String, error: String },
}

/// A task in the in-flight area.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    /// The exact blob that was moved; the handle for removing it again.
    pub raw: String,
    pub task: Task,
}

/// Sizes of the queue areas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub dead: usize,
    pub results: usize,
}

impl QueueStats {
    /// Tasks accounted for across all areas.
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.dead + self.results
    }
}

/// Queue handle. Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn Store>,
    keys: QueueKeys,
}

impl Queue {
    pub fn new(store: Arc<dyn Store>, keys: QueueKeys) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Push a task onto the head of the main queue.
    pub async fn push(&self, task: &Task) -> Result<()> {
        let blob = task.to_json()?;
        self.store.push_head(&self.keys.main, &blob).await?;
        self.count(&self.keys.main, "push");
        Ok(())
    }

    /// Move the oldest pending task into the in-flight area and stamp its claim time.
    ///
    /// Blocks up to `timeout` when the main queue is empty. Returns `None` if
    /// nothing arrived.
    pub async fn claim(&self, timeout: Duration) -> Result<Option<Claim>> {
        let Some(raw) = self
            .store
            .atomic_move(&self.keys.main, &self.keys.in_flight, timeout)
            .await?
        else {
            return Ok(None);
        };
        self.count(&self.keys.main, "claim");

        let task = match Task::from_json(&raw) {
            Ok(task) => task,
            Err(e) => {
                return Ok(Some(Claim::Malformed {
                    raw,
                    error: e.to_string(),
                }));
            }
        };

        self.stamp(&task.id, Utc::now()).await?;
        Ok(Some(Claim::Task(ClaimedTask { raw, task })))
    }

    /// Record when a task entered the in-flight area. Overwrites any earlier stamp.
    pub async fn stamp(&self, id: &TaskId, popped_at: DateTime<Utc>) -> Result<()> {
        self.store
            .map_set(
                &self.keys.meta(id),
                POPPED_AT,
                &to_epoch_seconds(&popped_at).to_string(),
            )
            .await
    }

    /// Claim time of an in-flight task, if its metadata exists and parses.
    pub async fn popped_at(&self, id: &TaskId) -> Result<Option<DateTime<Utc>>> {
        let meta = self.store.map_get_all(&self.keys.meta(id)).await?;
        Ok(meta
            .get(POPPED_AT)
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(from_epoch_seconds))
    }

    /// Success path: record the outcome, then release the in-flight entry.
    pub async fn complete(&self, claimed: &ClaimedTask, outcome: &Outcome) -> Result<()> {
        let record = TaskResult {
            task_id: claimed.task.id.clone(),
            result: outcome.clone(),
            ts: Utc::now(),
        };
        let blob = serde_json::to_string(&record)?;
        self.store.push_head(&self.keys.results, &blob).await?;
        self.count(&self.keys.results, "push");

        self.release(&claimed.raw, Some(&claimed.task.id)).await
    }

    /// Push an updated copy of the task back onto the main queue, then
    /// remove the old in-flight entry.
    ///
    /// Metadata is keyed by task id, so it goes first: once the new copy is
    /// on the main queue another worker may claim and stamp it.
    pub async fn requeue(&self, raw: &str, task: &Task) -> Result<()> {
        self.store.map_delete(&self.keys.meta(&task.id)).await?;
        self.push(task).await?;
        self.remove_in_flight(raw, Some(&task.id)).await
    }

    /// Move a task to the dead-letter area, then release the in-flight entry.
    pub async fn dead_letter(&self, raw: &str, task: &Task) -> Result<()> {
        let blob = task.to_json()?;
        self.store.push_head(&self.keys.dead, &blob).await?;
        self.count(&self.keys.dead, "push");
        self.release(raw, Some(&task.id)).await
    }

    /// Return an in-flight blob to the main queue unchanged.
    ///
    /// Same ordering as [`requeue`](Self::requeue). A crash after the
    /// metadata delete leaves an orphan, which the reaper picks up later.
    pub async fn reclaim(&self, raw: &str, id: &TaskId) -> Result<()> {
        self.store.map_delete(&self.keys.meta(id)).await?;
        self.store.push_head(&self.keys.main, raw).await?;
        self.count(&self.keys.main, "reclaim");
        self.remove_in_flight(raw, Some(id)).await
    }

    /// Remove a blob from the in-flight area and delete its metadata.
    ///
    /// Idempotent: both steps succeed when the entry is already gone.
    pub async fn release(&self, raw: &str, id: Option<&TaskId>) -> Result<()> {
        self.remove_in_flight(raw, id).await?;
        if let Some(id) = id {
            self.store.map_delete(&self.keys.meta(id)).await?;
        }
        Ok(())
    }

    async fn remove_in_flight(&self, raw: &str, id: Option<&TaskId>) -> Result<()> {
        let removed = self.store.remove_one(&self.keys.in_flight, raw).await?;
        if removed == 0 {
            debug!(task_id = ?id.map(TaskId::as_str), "in-flight entry already released");
        }
        self.count(&self.keys.in_flight, "remove");
        Ok(())
    }

    /// Snapshot of the in-flight area, newest claim first.
    pub async fn in_flight(&self) -> Result<Vec<String>> {
        self.store.range(&self.keys.in_flight).await
    }

    /// Snapshot of the main queue, newest push first.
    pub async fn pending(&self) -> Result<Vec<String>> {
        self.store.range(&self.keys.main).await
    }

    /// Dead tasks, most recent first. Unparseable entries are skipped.
    pub async fn dead(&self, limit: usize) -> Result<Vec<Task>> {
        let entries = self.store.range(&self.keys.dead).await?;
        Ok(entries
            .iter()
            .filter_map(|raw| Task::from_json(raw).ok())
            .take(limit)
            .collect())
    }

    /// Result records, most recent first.
    pub async fn results(&self, limit: usize) -> Result<Vec<TaskResult>> {
        let entries = self.store.range(&self.keys.results).await?;
        Ok(entries
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .take(limit)
            .collect())
    }

    /// Put a dead task back into circulation with a fresh retry budget.
    pub async fn revive_dead(&self, id: &TaskId) -> Result<Task> {
        let entries = self.store.range(&self.keys.dead).await?;
        let found = entries.into_iter().find_map(|raw| {
            let task = Task::from_json(&raw).ok()?;
            (task.id == *id).then_some((raw, task))
        });
        let Some((raw, mut task)) = found else {
            return Err(Error::NotFound(id.to_string()));
        };

        task.retries = 0;
        self.push(&task).await?;
        self.store.remove_one(&self.keys.dead, &raw).await?;
        self.count(&self.keys.dead, "revive");
        Ok(task)
    }

    /// Sizes of all four areas.
    pub async fn stats(&self) -> Result<QueueStats> {
        let (pending, in_flight, dead, results) = tokio::try_join!(
            self.store.len(&self.keys.main),
            self.store.len(&self.keys.in_flight),
            self.store.len(&self.keys.dead),
            self.store.len(&self.keys.results),
        )?;
        Ok(QueueStats {
            pending,
            in_flight,
            dead,
            results,
        })
    }

    fn count(&self, queue: &str, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}
