//! Worker engine: dispatch loop, retry handling, and the reaper.
//!
//! A [`Worker`] is one process's share of the pool. It runs a dispatch loop
//! and a background reaper; the two communicate only through the store.

pub mod dispatch;
pub mod reaper;
pub mod retry;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::error;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::ExecutorRegistry;
use crate::queue::Queue;

pub use dispatch::{DispatchConfig, DispatchLoop};
pub use reaper::{Reaper, ReaperConfig, SweepReport};
pub use retry::{RetryHandler, RetryPolicy, Settlement};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub dispatch: DispatchConfig,
    pub reaper: ReaperConfig,
    pub retry: RetryPolicy,
    /// Run a reaper alongside the dispatch loop. One per process is plenty.
    pub run_reaper: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            reaper: ReaperConfig::default(),
            retry: RetryPolicy::default(),
            run_reaper: true,
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dispatch: DispatchConfig {
                max_workers: config.max_workers,
                claim_timeout: config.claim_timeout,
                ..DispatchConfig::default()
            },
            reaper: ReaperConfig {
                interval: config.reaper_interval,
                visibility_timeout: config.visibility_timeout,
                orphan_grace: config.visibility_timeout,
            },
            retry: RetryPolicy::new(config.backoff_base, config.backoff_cap),
            run_reaper: true,
        }
    }
}

/// One worker process: a dispatch loop plus a reaper, sharing a shutdown signal.
#[derive(Clone)]
pub struct Worker {
    queue: Queue,
    registry: Arc<ExecutorRegistry>,
    config: WorkerConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Worker {
    pub fn new(queue: Queue, registry: Arc<ExecutorRegistry>, config: WorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            registry,
            config,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Signal the worker to stop claiming and drain outstanding tasks.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run until shutdown. Returns once every claimed task has settled and
    /// the reaper has stopped.
    pub async fn run(&self) -> Result<()> {
        if self.config.dispatch.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }

        let reaper = self.config.run_reaper.then(|| {
            let reaper = Reaper::new(self.queue.clone(), self.config.reaper.clone());
            tokio::spawn(reaper.run(self.shutdown.subscribe()))
        });

        DispatchLoop::new(
            self.queue.clone(),
            Arc::clone(&self.registry),
            self.config.retry,
            self.config.dispatch.clone(),
            self.shutdown.subscribe(),
        )
        .run()
        .await;

        self.shutdown();
        if let Some(handle) = reaper {
            if let Err(e) = handle.await {
                error!("reaper task panicked: {e}");
            }
        }
        Ok(())
    }
}
