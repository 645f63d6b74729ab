//! Core data model.
//!
//! A task is a unit of work: a type tag selecting the executor, an opaque
//! payload, and a retry budget. Its JSON form is the wire format shared with
//! producers written in other languages, and the serialized blob doubles as
//! the task's identity inside the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retry budget used when a producer does not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Largest retry budget a task can carry. The failure count must be able to
/// exceed it.
pub const MAX_RETRY_BUDGET: u32 = u32::MAX - 1;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work moving through the queue areas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaskWire")]
pub struct Task {
    /// Unique identifier, assigned by the producer.
    pub id: TaskId,

    /// Selects the executor that runs this task.
    #[serde(rename = "type")]
    pub task_type: String,

    /// Arbitrary input for the executor. The queue never interprets it.
    pub payload: serde_json::Value,

    #[serde(rename = "ts", serialize_with = "epoch_seconds::serialize")]
    pub created_at: DateTime<Utc>,

    /// Failed attempts so far.
    pub retries: u32,

    /// Failed attempts tolerated before the task goes dead.
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Incoming task blob. Producers stamp the creation time as `ts`, older ones
/// as `created_at`, and some send both.
#[derive(Deserialize)]
struct TaskWire {
    id: TaskId,
    #[serde(rename = "type")]
    task_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    ts: Option<f64>,
    #[serde(default)]
    created_at: Option<f64>,
    #[serde(default)]
    retries: u32,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
}

impl TryFrom<TaskWire> for Task {
    type Error = String;

    fn try_from(wire: TaskWire) -> Result<Self, Self::Error> {
        let created_at = match wire.ts.or(wire.created_at) {
            Some(secs) => from_epoch_seconds(secs)
                .ok_or_else(|| format!("timestamp out of range: {secs}"))?,
            None => Utc::now(),
        };
        Ok(Task {
            id: wire.id,
            task_type: wire.task_type,
            payload: wire.payload,
            created_at,
            retries: wire.retries,
            max_retries: wire.max_retries.min(MAX_RETRY_BUDGET),
        })
    }
}

impl Task {
    /// Parse a task from its serialized form.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// True once the retry budget is spent. A task in this state must be dead-lettered.
    pub fn is_exhausted(&self) -> bool {
        self.retries > self.max_retries.min(MAX_RETRY_BUDGET)
    }
}

/// Newtype for task IDs.
///
/// Producers in other languages may hand us any string, so the ID is kept as
/// text rather than parsed into a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// The store does not record state explicitly; a task's state is implied by
/// which queue area holds it. The enum exists for span events and checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Built by a producer, not yet published.
    Created,
    /// Waiting in the main queue.
    Queued,
    /// Claimed by a worker, metadata stamped.
    InFlight,
    /// Executed successfully, result recorded. Terminal.
    Completed,
    /// Failed with budget remaining, pushed back onto the main queue.
    Requeued,
    /// Retry budget exhausted. Terminal.
    Dead,
}

impl State {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Created, Queued)
                | (Queued, InFlight)
                | (InFlight, Completed)
                | (InFlight, Requeued)
                | (InFlight, Dead)
                | (InFlight, Queued)    // reclaimed by the reaper
                | (Requeued, Queued)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Dead)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Created => "created",
            State::Queued => "queued",
            State::InFlight => "in_flight",
            State::Completed => "completed",
            State::Requeued => "requeued",
            State::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What an executor reports after running a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Exit code. Zero means success.
    #[serde(rename = "retcode")]
    pub code: i32,
    /// Primary result (trimmed stdout), or a diagnostic for failures.
    pub output: String,
    pub duration_ms: u64,
    /// Set when the executor could not run the task at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl Outcome {
    /// The outcome reported for task types nothing is registered for.
    pub fn noop() -> Self {
        Self {
            code: 0,
            output: "noop".to_string(),
            duration_ms: 0,
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            code: -1,
            output: message.into(),
            duration_ms,
            failure: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0 && self.failure.is_none()
    }
}

/// Why an executor produced no exit code of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The executor binary does not exist.
    BackendMissing,
    /// The binary exists but could not be started.
    SpawnFailed,
    /// The payload lacks what the executor needs to build its argument.
    InvalidPayload,
    /// The process was killed by a signal.
    Terminated,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::BackendMissing => "backend_missing",
            FailureKind::SpawnFailed => "spawn_failed",
            FailureKind::InvalidPayload => "invalid_payload",
            FailureKind::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Entry appended to the results sink when a task succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub result: Outcome,
    #[serde(with = "epoch_seconds")]
    pub ts: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new tasks. The producer's public API for submitting work.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) task_type: String,
    pub(crate) payload: serde_json::Value,
    pub(crate) max_retries: u32,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            payload: serde_json::Value::Null,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Failed attempts tolerated. Capped at [`MAX_RETRY_BUDGET`].
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n.min(MAX_RETRY_BUDGET);
        self
    }

    /// Assign an ID and creation time.
    pub fn build(self) -> Task {
        Task {
            id: TaskId::new(),
            task_type: self.task_type,
            payload: self.payload,
            created_at: Utc::now(),
            retries: 0,
            max_retries: self.max_retries,
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Float seconds since the Unix epoch, at microsecond precision.
pub fn to_epoch_seconds(at: &DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

/// Serde adapter for timestamps stored as float epoch seconds.
pub(crate) mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(super::to_epoch_seconds(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(d)?;
        super::from_epoch_seconds(secs)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {secs}")))
    }
}
