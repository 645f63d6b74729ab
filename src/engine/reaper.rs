//! Reaper: returns abandoned in-flight tasks to the main queue.
//!
//! A worker that dies mid-task leaves its claim in the in-flight area with
//! metadata recording when it was taken. Each sweep pushes entries older than
//! the visibility timeout back onto the main queue.
//!
//! Entries without metadata are orphans: the claim moved them but the stamp
//! never landed. The reaper remembers when it first saw each orphan and
//! reclaims it once it has stayed orphaned past the grace period. Orphans
//! that do not parse as tasks are dropped instead, never requeued.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::Task;
use crate::queue::Queue;
use crate::telemetry::metrics;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Claims older than this are presumed abandoned.
    pub visibility_timeout: Duration,
    /// How long an entry may lack metadata before it is reclaimed.
    pub orphan_grace: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(30),
            orphan_grace: Duration::from_secs(30),
        }
    }
}

/// Summary of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// In-flight entries inspected.
    pub scanned: usize,
    /// Stale claims returned to the main queue.
    pub reclaimed: usize,
    /// Entries without metadata returned to the main queue.
    pub orphans_reclaimed: usize,
    /// Unparseable entries removed.
    pub malformed_dropped: usize,
    /// Entries skipped because a store call failed.
    pub errors: usize,
}

pub struct Reaper {
    queue: Queue,
    config: ReaperConfig,
    /// First sighting of each in-flight blob that had no metadata.
    orphans: HashMap<String, Instant>,
}

impl Reaper {
    pub fn new(queue: Queue, config: ReaperConfig) -> Self {
        Self {
            queue,
            config,
            orphans: HashMap::new(),
        }
    }

    /// Sweep on the configured interval until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            visibility_timeout_ms = self.config.visibility_timeout.as_millis() as u64,
            "reaper started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            match self.sweep().await {
                Ok(report) => {
                    if report.reclaimed + report.orphans_reclaimed + report.malformed_dropped > 0 {
                        info!(?report, "reaper sweep recovered entries");
                    } else {
                        debug!(scanned = report.scanned, "reaper sweep");
                    }
                }
                Err(e) => warn!("reaper sweep failed: {e}"),
            }
        }

        info!("reaper stopped");
    }

    /// Inspect every in-flight entry once.
    pub async fn sweep(&mut self) -> Result<SweepReport> {
        let entries = self.queue.in_flight().await?;
        let mut report = SweepReport::default();
        let mut still_orphaned = HashSet::new();

        for raw in entries {
            report.scanned += 1;
            if let Err(e) = self.inspect(&raw, &mut report, &mut still_orphaned).await {
                report.errors += 1;
                warn!("reaper failed on in-flight entry: {e}");
            }
        }

        // Forget orphans that have since been stamped or removed.
        self.orphans.retain(|raw, _| still_orphaned.contains(raw));
        Ok(report)
    }

    async fn inspect(
        &mut self,
        raw: &str,
        report: &mut SweepReport,
        still_orphaned: &mut HashSet<String>,
    ) -> Result<()> {
        let task = Task::from_json(raw).ok();

        let popped_at = match &task {
            Some(task) => self.queue.popped_at(&task.id).await?,
            None => None,
        };

        if let (Some(task), Some(popped_at)) = (&task, popped_at) {
            let age = (Utc::now() - popped_at).to_std().unwrap_or_default();
            if age > self.config.visibility_timeout {
                info!(
                    task_id = %task.id,
                    age_ms = age.as_millis() as u64,
                    "requeueing stale in-flight task"
                );
                self.queue.reclaim(raw, &task.id).await?;
                report.reclaimed += 1;
                metrics::reaper_reclaimed().add(1, &[KeyValue::new("reason", "stale")]);
            }
            return Ok(());
        }

        let first_seen = *self
            .orphans
            .entry(raw.to_string())
            .or_insert_with(Instant::now);
        if first_seen.elapsed() < self.config.orphan_grace {
            still_orphaned.insert(raw.to_string());
            return Ok(());
        }

        match &task {
            Some(task) => {
                warn!(task_id = %task.id, "requeueing in-flight task with no metadata");
                self.queue.reclaim(raw, &task.id).await?;
                report.orphans_reclaimed += 1;
                metrics::reaper_reclaimed().add(1, &[KeyValue::new("reason", "orphan")]);
            }
            None => {
                error!(raw = %truncate(raw, 200), "dropping malformed in-flight entry");
                self.queue.release(raw, None).await?;
                report.malformed_dropped += 1;
                metrics::malformed_dropped().add(1, &[KeyValue::new("source", "reaper")]);
            }
        }
        self.orphans.remove(raw);
        Ok(())
    }
}

/// Shorten a blob for logging, on a char boundary.
pub(crate) fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
