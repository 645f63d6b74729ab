//! Executor bridge and registry.
//!
//! An executor runs one task and reports an [`Outcome`]. The registry maps
//! task type strings to executors; tasks whose type has no entry succeed as
//! no-ops. External executors are configured by TOML files, one per type:
//!
//! ```toml
//! [executor]
//! name = "heavy_compute"
//! command = "plugins/c_plugin/bin/heavy_compute"
//! arg = "n"
//! default = 200
//! ```

pub mod process;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Outcome, Task};

pub use process::{ArgSource, ProcessExecutor};

/// Runs tasks of one type.
///
/// `execute` never fails: problems running the task are reported as a
/// failing [`Outcome`] so that they go through the retry path.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task) -> Outcome;
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ExecutorFile {
    executor: ExecutorMeta,
}

/// An external executor's configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorMeta {
    /// Task type this executor handles.
    pub name: String,
    /// Binary to invoke. Relative paths resolve against the working directory.
    pub command: PathBuf,
    /// Payload field passed as the argument. `None` passes the whole payload as JSON.
    #[serde(default)]
    pub arg: Option<String>,
    /// Value used when the payload lacks `arg`.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

impl ExecutorMeta {
    pub fn into_executor(self) -> ProcessExecutor {
        let arg = match self.arg {
            Some(field) => ArgSource::Field {
                name: field,
                default: self.default,
            },
            None => ArgSource::Payload,
        };
        ProcessExecutor::new(self.command, arg)
    }
}

/// Registry of executors, indexed by task type.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry. Every task runs as a no-op.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register an executor for a task type, replacing any previous one.
    pub fn register(&mut self, task_type: impl Into<String>, executor: Arc<dyn Executor>) {
        self.executors.insert(task_type.into(), executor);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, task_type: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.register(task_type, executor);
        self
    }

    /// Load all `.toml` files from a directory and build the registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::empty();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read executor dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let file: ExecutorFile = toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("bad executor config {}: {e}", path.display()))
                })?;
                let meta = file.executor;
                debug!(task_type = %meta.name, command = %meta.command.display(), "executor loaded");
                registry.register(meta.name.clone(), Arc::new(meta.into_executor()));
            }
        }

        Ok(registry)
    }

    /// Look up the executor for a task type.
    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn Executor>> {
        self.executors.get(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Run a task with the executor registered for its type.
    pub async fn execute(&self, task: &Task) -> Outcome {
        match self.get(&task.task_type) {
            Some(executor) => executor.execute(task).await,
            None => {
                debug!(task_id = %task.id, task_type = %task.task_type, "no executor registered, running as no-op");
                Outcome::noop()
            }
        }
    }
}
