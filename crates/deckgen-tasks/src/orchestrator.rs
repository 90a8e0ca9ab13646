//! Task orchestrator
//!
//! Binds one task record to one pool run: `PENDING -> RUNNING`, per-item
//! write-back plus progress increment, then the terminal status.
//
// Decision: Preconditions are checked after RUNNING so every rejected batch is still
//           visible to pollers as RUNNING -> FAILED.
// Decision: A batch where every item failed ends FAILED (ALL_ITEMS_FAILED).
// Decision: Project status is best effort; a vanished project is only logged.
// Decision: Project status is settled before the terminal write, so a poller that
//           sees the terminal record also sees the final project status.
// Decision: The terminal write carries the full progress count, so a lost counter
//           increment never leaves a terminal record short of its total.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deckgen_core::{
    PageUpdate, ProjectStatus, RecordStore, StoreError, TaskError, TaskProgress, TaskRecord,
    TaskStatus,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::executor::{execute_with_timeout, FailureKind, ItemFailure, WorkItem, WorkItemExecutor};
use crate::pool::{BoundedWorkerPool, PoolResult, ResultHandler};

/// Orchestrator errors
///
/// Only raised when the task record itself cannot be driven. Item failures
/// and precondition failures end up on the record instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A work item that ended in failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub index: usize,
    pub target: Uuid,
    pub failure: ItemFailure,
}

/// Outcome of one orchestrated batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub error: Option<TaskError>,
    /// Failed items ordered by index
    pub failures: Vec<FailedItem>,
}

impl From<TaskRecord> for BatchReport {
    fn from(task: TaskRecord) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            error: task.error,
            failures: Vec::new(),
        }
    }
}

/// Drives task records through a bounded pool run
pub struct TaskOrchestrator {
    store: Arc<dyn RecordStore>,
    item_timeout: Duration,
}

impl TaskOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            item_timeout: Duration::from_secs(300),
        }
    }

    /// Set the per-item call deadline
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn item_timeout(&self) -> Duration {
        self.item_timeout
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Run one batch to its terminal status
    #[instrument(skip(self, executor, items), fields(executor = executor.name(), items = items.len()))]
    pub async fn run<E>(
        &self,
        task_id: Uuid,
        executor: Arc<E>,
        items: Vec<WorkItem<E::Payload>>,
        concurrency: usize,
    ) -> Result<BatchReport, OrchestratorError>
    where
        E: WorkItemExecutor,
    {
        let task = self.store.mark_task_running(task_id).await.map_err(|e| {
            error!(task_id = %task_id, error = %e, "Failed to start task");
            e
        })?;

        info!(
            task_id = %task_id,
            task_type = %task.task_type,
            owner_id = %task.owner_id,
            total = task.progress.total,
            concurrency,
            "Task running"
        );

        let pool = match self.check_preconditions(&task, items.len(), concurrency).await {
            Ok(pool) => pool,
            Err(message) => return self.fail_precondition(&task, message).await,
        };

        let mut committer = BatchCommitter {
            store: Arc::clone(&self.store),
            executor: Arc::clone(&executor),
            task_id,
            targets: items.iter().map(|item| (item.index, item.target)).collect(),
            tally: TaskProgress::new(task.progress.total),
            failures: Vec::new(),
        };

        let timeout = self.item_timeout;
        pool.run(
            items,
            move |item: WorkItem<E::Payload>| {
                let executor = Arc::clone(&executor);
                async move { execute_with_timeout(executor.as_ref(), &item, timeout).await }
            },
            &mut committer,
        )
        .await;

        let mut failures = committer.failures;
        failures.sort_by_key(|f| f.index);
        let mut report = self.finish(&task, committer.tally).await?;
        report.failures = failures;
        Ok(report)
    }

    /// Batch-level checks; any violation fails the whole batch before it starts
    async fn check_preconditions(
        &self,
        task: &TaskRecord,
        item_count: usize,
        concurrency: usize,
    ) -> Result<BoundedWorkerPool, String> {
        if item_count == 0 {
            return Err("batch has no work items".to_string());
        }
        if item_count != task.progress.total as usize {
            return Err(format!(
                "batch has {item_count} work items but the task expects {}",
                task.progress.total
            ));
        }
        let pool = BoundedWorkerPool::new(concurrency).map_err(|e| e.to_string())?;
        match self.store.get_project(task.owner_id).await {
            Ok(_) => Ok(pool),
            Err(StoreError::ProjectNotFound(id)) => Err(format!("project {id} no longer exists")),
            Err(e) => Err(format!("could not load project: {e}")),
        }
    }

    async fn fail_precondition(
        &self,
        task: &TaskRecord,
        message: String,
    ) -> Result<BatchReport, OrchestratorError> {
        warn!(task_id = %task.id, reason = %message, "Task precondition failed");

        self.settle_project(task.owner_id, task.task_type.fallback_status())
            .await;
        let finished = self
            .store
            .finish_task(
                task.id,
                TaskStatus::Failed,
                None,
                Some(TaskError::precondition(message)),
            )
            .await?;

        Ok(finished.into())
    }

    async fn finish(
        &self,
        task: &TaskRecord,
        tally: TaskProgress,
    ) -> Result<BatchReport, OrchestratorError> {
        let stored = self.store.get_task(task.id).await?.progress;
        let progress = if stored.is_exhausted() {
            stored
        } else {
            // Some counter writes were lost; the local tally is the only full count
            warn!(
                task_id = %task.id,
                stored_completed = stored.completed,
                stored_failed = stored.failed,
                completed = tally.completed,
                failed = tally.failed,
                "Stored progress incomplete at end of batch"
            );
            tally
        };

        let status = progress.terminal_status();
        let error = (status == TaskStatus::Failed).then(|| TaskError::all_items_failed(progress.total));

        let project_status = if progress.completed > 0 {
            task.task_type.finished_status()
        } else {
            task.task_type.fallback_status()
        };
        self.settle_project(task.owner_id, project_status).await;

        let finished = self
            .store
            .finish_task(task.id, status, Some(progress), error)
            .await?;

        info!(
            task_id = %task.id,
            status = %finished.status,
            completed = finished.progress.completed,
            failed = finished.progress.failed,
            total = finished.progress.total,
            "Task finished"
        );

        Ok(finished.into())
    }

    async fn settle_project(&self, project_id: Uuid, status: ProjectStatus) {
        match self.store.update_project_status(project_id, status).await {
            Ok(()) => debug!(project_id = %project_id, status = %status, "Project status updated"),
            Err(StoreError::ProjectNotFound(_)) => {
                warn!(project_id = %project_id, "Project vanished before status update")
            }
            Err(e) => error!(project_id = %project_id, error = %e, "Failed to update project status"),
        }
    }
}

/// Result handler committing each item's output and progress in one step
struct BatchCommitter<E> {
    store: Arc<dyn RecordStore>,
    executor: Arc<E>,
    task_id: Uuid,
    /// (item index, target page) by input position
    targets: Vec<(usize, Uuid)>,
    tally: TaskProgress,
    failures: Vec<FailedItem>,
}

impl<E: WorkItemExecutor> BatchCommitter<E> {
    async fn write_back(&self, target: Uuid, update: PageUpdate) -> Result<(), ItemFailure> {
        let result = match self.store.apply_page_update(target, update.clone()).await {
            Ok(_) => return Ok(()),
            Err(StoreError::PageNotFound(id)) => {
                Err(ItemFailure::not_found(format!("page {id} was deleted")))
            }
            Err(e) => Err(ItemFailure::storage(e.to_string())),
        };
        self.executor.discard(&update).await;
        result
    }
}

#[async_trait]
impl<E: WorkItemExecutor> ResultHandler<Result<PageUpdate, ItemFailure>> for BatchCommitter<E> {
    async fn on_result(&mut self, result: PoolResult<Result<PageUpdate, ItemFailure>>) {
        let (index, target) = self.targets[result.index];

        let outcome = match result.outcome {
            Ok(Ok(update)) => self.write_back(target, update).await,
            Ok(Err(failure)) => Err(failure),
            Err(fault) => Err(ItemFailure::new(
                FailureKind::ExternalServiceError,
                fault.to_string(),
            )),
        };

        let succeeded = outcome.is_ok();
        match &outcome {
            Ok(()) => {
                self.tally.completed += 1;
                debug!(task_id = %self.task_id, index, target = %target, "Work item succeeded");
            }
            Err(failure) => {
                self.tally.failed += 1;
                warn!(
                    task_id = %self.task_id,
                    index,
                    target = %target,
                    kind = %failure.kind,
                    error = %failure.message,
                    "Work item failed"
                );
                self.failures.push(FailedItem {
                    index,
                    target,
                    failure: failure.clone(),
                });
            }
        }

        match self.store.record_item_outcome(self.task_id, succeeded).await {
            Ok(progress) => debug!(
                task_id = %self.task_id,
                completed = progress.completed,
                failed = progress.failed,
                total = progress.total,
                "Progress updated"
            ),
            Err(e) => error!(task_id = %self.task_id, index, error = %e, "Failed to record progress"),
        }
    }
}
