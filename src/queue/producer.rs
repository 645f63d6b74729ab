//! Producer: builds tasks and publishes them to the main queue.

use opentelemetry::KeyValue;
use tracing::info;

use crate::error::Result;
use crate::model::{NewTask, Task};
use crate::telemetry::metrics;

use super::Queue;

#[derive(Clone)]
pub struct Producer {
    queue: Queue,
}

impl Producer {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    /// Create a task and push it onto the head of the main queue.
    ///
    /// The payload is passed through untouched. Fails only if the store does.
    pub async fn enqueue(
        &self,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> Result<Task> {
        self.submit(
            NewTask::new(task_type)
                .payload(payload)
                .max_retries(max_retries),
        )
        .await
    }

    /// Publish a task built with [`NewTask`].
    pub async fn submit(&self, new: NewTask) -> Result<Task> {
        let task = new.build();
        self.queue.push(&task).await?;

        metrics::tasks_enqueued().add(1, &[KeyValue::new("task_type", task.task_type.clone())]);
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            max_retries = task.max_retries,
            "task enqueued"
        );
        Ok(task)
    }
}
