//! Batch launcher
//!
//! Request-layer entry point: create the task record, move the project into
//! its in-progress status and hand the orchestrator run to the gateway.

use std::sync::Arc;
use std::time::Duration;

use deckgen_core::{NewTask, RecordStore, StoreError, TaskError, TaskStatus, TaskType};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::executor::{WorkItem, WorkItemExecutor};
use crate::gateway::SubmissionGateway;
use crate::orchestrator::TaskOrchestrator;
use crate::registry::SubmitError;

/// How long shutdown waits for aborted batches to leave the registry
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("submission refused: {0}")]
    Submit(#[from] SubmitError),
}

/// Launches batches and returns their task id without waiting for them
#[derive(Clone)]
pub struct BatchLauncher {
    store: Arc<dyn RecordStore>,
    orchestrator: Arc<TaskOrchestrator>,
    gateway: SubmissionGateway,
}

impl BatchLauncher {
    pub fn new(orchestrator: Arc<TaskOrchestrator>, gateway: SubmissionGateway) -> Self {
        Self {
            store: Arc::clone(orchestrator.store()),
            orchestrator,
            gateway,
        }
    }

    pub fn gateway(&self) -> &SubmissionGateway {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Create a `PENDING` task for `items` and submit it
    ///
    /// Returns as soon as the batch is scheduled. Poll the task record for
    /// progress.
    #[instrument(skip(self, executor, items), fields(items = items.len()))]
    pub async fn launch<E>(
        &self,
        task_type: TaskType,
        owner_id: Uuid,
        executor: Arc<E>,
        items: Vec<WorkItem<E::Payload>>,
        concurrency: usize,
    ) -> Result<Uuid, LaunchError>
    where
        E: WorkItemExecutor,
    {
        if let Some(active_task_id) = self.gateway.registry().active_for_owner(owner_id) {
            return Err(SubmitError::OwnerBusy {
                owner_id,
                active_task_id,
            }
            .into());
        }

        self.store
            .update_project_status(owner_id, task_type.in_progress_status())
            .await?;

        let total = u32::try_from(items.len())
            .map_err(|_| StoreError::Serialization(format!("batch too large: {}", items.len())))?;
        let task = self
            .store
            .create_task(NewTask {
                task_type,
                owner_id,
                total,
            })
            .await?;
        let task_id = task.id;

        let orchestrator = Arc::clone(&self.orchestrator);
        let submitted = self.gateway.submit(task_id, owner_id, async move {
            if let Err(e) = orchestrator.run(task_id, executor, items, concurrency).await {
                error!(task_id = %task_id, error = %e, "Batch aborted");
            }
        });

        if let Err(e) = submitted {
            warn!(task_id = %task_id, error = %e, "Batch submission refused");
            self.abandon(task_id, task_type, owner_id, &e).await;
            return Err(e.into());
        }

        info!(
            task_id = %task_id,
            task_type = %task_type,
            owner_id = %owner_id,
            total,
            concurrency,
            "Batch launched"
        );
        Ok(task_id)
    }

    /// Close out a task whose submission was refused
    async fn abandon(&self, task_id: Uuid, task_type: TaskType, owner_id: Uuid, reason: &SubmitError) {
        let error = TaskError::precondition(reason.to_string());
        if let Err(e) = self
            .store
            .finish_task(task_id, TaskStatus::Failed, None, Some(error))
            .await
        {
            error!(task_id = %task_id, error = %e, "Failed to close refused task");
        }
        // Another batch owns the project status while it runs
        if !matches!(reason, SubmitError::OwnerBusy { .. }) {
            if let Err(e) = self
                .store
                .update_project_status(owner_id, task_type.fallback_status())
                .await
            {
                warn!(owner_id = %owner_id, error = %e, "Failed to restore project status");
            }
        }
    }

    /// Abort every in-flight batch and close its task record as `FAILED`
    ///
    /// The project falls back to its pre-stage status. A batch that reached
    /// its own terminal status before the abort keeps it. Returns the number
    /// of records closed here.
    pub async fn shutdown(&self) -> usize {
        let registry = self.gateway.registry();
        let aborted = registry.shutdown();

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while aborted.iter().any(|t| registry.is_running(t.task_id)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Aborted batches still registered after the grace period");
        }

        let mut closed = 0;
        for active in aborted {
            match self.close_interrupted(active.task_id).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(task_id = %active.task_id, error = %e, "Failed to close interrupted task")
                }
            }
        }
        closed
    }

    async fn close_interrupted(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let task = self.store.get_task(task_id).await?;
        if task.status.is_terminal() {
            debug!(task_id = %task_id, status = %task.status, "Batch finished before shutdown");
            return Ok(false);
        }

        if let Err(e) = self
            .store
            .update_project_status(task.owner_id, task.task_type.fallback_status())
            .await
        {
            warn!(owner_id = %task.owner_id, error = %e, "Failed to restore project status");
        }
        let error = TaskError::interrupted("process shut down while the batch was running");
        match self
            .store
            .finish_task(task_id, TaskStatus::Failed, None, Some(error))
            .await
        {
            Ok(_) => {
                warn!(task_id = %task_id, "Interrupted task closed as FAILED");
                Ok(true)
            }
            Err(StoreError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
