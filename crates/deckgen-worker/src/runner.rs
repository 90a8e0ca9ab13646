//! Stage runner: launch one batch and poll its task record until terminal
//!
//! A stage counts as done once its record is terminal and the batch has left
//! the registry, so the next stage for the same project is never refused.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use deckgen_core::{TaskProgress, TaskRecord, TaskType};
use deckgen_tasks::{BatchLauncher, WorkItem, WorkItemExecutor};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct StageRunner {
    launcher: BatchLauncher,
    poll_interval: Duration,
}

impl StageRunner {
    pub fn new(launcher: BatchLauncher, poll_interval: Duration) -> Self {
        Self {
            launcher,
            poll_interval,
        }
    }

    pub fn launcher(&self) -> &BatchLauncher {
        &self.launcher
    }

    /// Launch a stage and wait for its terminal record
    pub async fn run<E>(
        &self,
        task_type: TaskType,
        project_id: Uuid,
        executor: Arc<E>,
        items: Vec<WorkItem<E::Payload>>,
        concurrency: usize,
    ) -> Result<TaskRecord>
    where
        E: WorkItemExecutor,
    {
        let task_id = self
            .launcher
            .launch(task_type, project_id, executor, items, concurrency)
            .await
            .with_context(|| format!("Failed to launch {task_type}"))?;
        self.wait(task_id).await
    }

    async fn wait(&self, task_id: Uuid) -> Result<TaskRecord> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut last: Option<TaskProgress> = None;
        loop {
            ticker.tick().await;
            let task = self
                .launcher
                .store()
                .get_task(task_id)
                .await
                .context("Failed to poll task")?;

            if last != Some(task.progress) {
                info!(
                    task_id = %task_id,
                    status = %task.status,
                    completed = task.progress.completed,
                    failed = task.progress.failed,
                    total = task.progress.total,
                    "Progress"
                );
                last = Some(task.progress);
            }
            if task.status.is_terminal() {
                if let Some(error) = &task.error {
                    warn!(task_id = %task_id, kind = %error.kind, message = %error.message, "Task failed");
                }
                self.wait_released(task_id, &mut ticker).await;
                return Ok(task);
            }
        }
    }

    /// Wait for the batch to drop its registry slot after the terminal write
    async fn wait_released(&self, task_id: Uuid, ticker: &mut tokio::time::Interval) {
        let registry = self.launcher.gateway().registry();
        while registry.is_running(task_id) {
            debug!(task_id = %task_id, "Waiting for batch to release its project");
            ticker.tick().await;
        }
    }
}
