//! Submission gateway
//!
//! Hands a batch future to the background runtime and returns immediately.

use std::future::Future;

use tokio::runtime::Handle;
use tracing::info;
use uuid::Uuid;

use crate::registry::{SubmitError, TaskRegistry};

/// Schedules batches on a long-lived runtime, outside the caller's context
#[derive(Clone)]
pub struct SubmissionGateway {
    registry: TaskRegistry,
    runtime: Handle,
}

impl SubmissionGateway {
    /// Create a gateway spawning onto `runtime`
    pub fn new(registry: TaskRegistry, runtime: Handle) -> Self {
        Self { registry, runtime }
    }

    /// Create a gateway bound to the runtime of the calling task
    pub fn current(registry: TaskRegistry) -> Result<Self, SubmitError> {
        let runtime = Handle::try_current().map_err(|e| SubmitError::NoRuntime(e.to_string()))?;
        Ok(Self::new(registry, runtime))
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Schedule `batch` for background execution
    ///
    /// Never runs the batch on the calling thread and never waits for it.
    /// Refuses a task id that is already in flight and a second batch for
    /// a project that has one running.
    pub fn submit<F>(&self, task_id: Uuid, owner_id: Uuid, batch: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.registry.reserve(task_id, owner_id)?;

        let handle = self.runtime.spawn(async move {
            let _guard = guard;
            batch.await;
        });
        self.registry.attach(task_id, handle.abort_handle());

        info!(task_id = %task_id, owner_id = %owner_id, "Batch submitted");
        Ok(())
    }
}
