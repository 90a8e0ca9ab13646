// Registry of in-flight batches
//
// Decision: A single mutex guards both maps so the one-batch-per-project check and the
//           insert happen atomically.
// Decision: Entries are released by a drop guard owned by the background future, so a
//           finished, panicked or aborted batch always leaves the registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Reasons a batch submission is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The task id is already in flight
    #[error("task already submitted: {0}")]
    AlreadySubmitted(Uuid),

    /// The owning project already has a batch in flight
    #[error("project {owner_id} already has batch {active_task_id} in flight")]
    OwnerBusy { owner_id: Uuid, active_task_id: Uuid },

    /// The registry was shut down
    #[error("task registry is shut down")]
    ShuttingDown,

    /// No Tokio runtime to run the batch on
    #[error("no async runtime available: {0}")]
    NoRuntime(String),
}

/// Snapshot of one in-flight batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTask {
    pub task_id: Uuid,
    pub owner_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}

struct Entry {
    owner_id: Uuid,
    submitted_at: DateTime<Utc>,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<Uuid, Entry>,
    owners: HashMap<Uuid, Uuid>,
    shut_down: bool,
}

impl RegistryState {
    fn remove(&mut self, task_id: Uuid) -> Option<Entry> {
        let entry = self.tasks.remove(&task_id)?;
        if self.owners.get(&entry.owner_id) == Some(&task_id) {
            self.owners.remove(&entry.owner_id);
        }
        Some(entry)
    }
}

/// Tracks in-flight batches by task id and owning project
///
/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a batch about to be spawned
    pub(crate) fn reserve(
        &self,
        task_id: Uuid,
        owner_id: Uuid,
    ) -> Result<RegistrationGuard, SubmitError> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(SubmitError::ShuttingDown);
        }
        if state.tasks.contains_key(&task_id) {
            return Err(SubmitError::AlreadySubmitted(task_id));
        }
        if let Some(active) = state.owners.get(&owner_id) {
            return Err(SubmitError::OwnerBusy {
                owner_id,
                active_task_id: *active,
            });
        }

        state.tasks.insert(
            task_id,
            Entry {
                owner_id,
                submitted_at: Utc::now(),
                abort: None,
            },
        );
        state.owners.insert(owner_id, task_id);

        Ok(RegistrationGuard {
            registry: self.clone(),
            task_id,
        })
    }

    /// Attach the abort handle of a spawned batch
    ///
    /// No-op if the batch already finished and released its entry.
    pub(crate) fn attach(&self, task_id: Uuid, abort: AbortHandle) {
        let mut state = self.state.lock();
        if !state.shut_down {
            if let Some(entry) = state.tasks.get_mut(&task_id) {
                entry.abort = Some(abort);
            }
            return;
        }
        drop(state);
        // Shutdown ran between reserve and spawn
        abort.abort();
    }

    fn release(&self, task_id: Uuid) {
        if self.state.lock().remove(task_id).is_some() {
            debug!(task_id = %task_id, "Batch released from registry");
        }
    }

    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.state.lock().tasks.contains_key(&task_id)
    }

    /// Task id of the batch in flight for a project, if any
    pub fn active_for_owner(&self, owner_id: Uuid) -> Option<Uuid> {
        self.state.lock().owners.get(&owner_id).copied()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        let state = self.state.lock();
        let mut tasks: Vec<ActiveTask> = state
            .tasks
            .iter()
            .map(|(task_id, entry)| ActiveTask {
                task_id: *task_id,
                owner_id: entry.owner_id,
                submitted_at: entry.submitted_at,
            })
            .collect();
        tasks.sort_by_key(|t| t.submitted_at);
        tasks
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Refuse new submissions and abort every in-flight batch
    ///
    /// Returns the aborted batches. Their task records are left as they were;
    /// closing them is up to the caller.
    pub fn shutdown(&self) -> Vec<ActiveTask> {
        let aborted: Vec<(ActiveTask, Option<AbortHandle>)> = {
            let mut state = self.state.lock();
            state.shut_down = true;
            state
                .tasks
                .iter_mut()
                .map(|(task_id, entry)| {
                    let task = ActiveTask {
                        task_id: *task_id,
                        owner_id: entry.owner_id,
                        submitted_at: entry.submitted_at,
                    };
                    (task, entry.abort.take())
                })
                .collect()
        };

        info!(active = aborted.len(), "Shutting down task registry");

        // Aborted futures are dropped on the runtime and release themselves
        let mut tasks = Vec::with_capacity(aborted.len());
        for (task, handle) in aborted {
            if let Some(handle) = handle {
                info!(task_id = %task.task_id, "Aborting batch on shutdown");
                handle.abort();
            }
            tasks.push(task);
        }
        tasks.sort_by_key(|t| t.submitted_at);
        tasks
    }
}

/// Removes a batch from the registry when dropped
pub(crate) struct RegistrationGuard {
    registry: TaskRegistry,
    task_id: Uuid,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.release(self.task_id);
    }
}
