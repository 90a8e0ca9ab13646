//! Record store contract shared by the in-memory and PostgreSQL backends

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::*;

/// Errors from record store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Project not found
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),

    /// Page not found
    #[error("page not found: {0}")]
    PageNotFound(Uuid),

    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Increment would push completed + failed past total
    #[error("progress overflow for task {task_id}: total {total} already processed")]
    ProgressOverflow { task_id: Uuid, total: u32 },

    /// Final progress would lower a counter, change the total or exceed it
    #[error("invalid final progress for task {task_id}: {reason}")]
    InvalidProgress { task_id: Uuid, reason: String },

    /// Task status change not allowed from its current status
    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the error means the addressed record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProjectNotFound(_) | Self::PageNotFound(_) | Self::TaskNotFound(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Storage for projects, pages and task records
///
/// Every write is visible to subsequent reads from any caller as soon as the
/// call returns.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    // =========================================================================
    // Projects
    // =========================================================================

    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError>;

    async fn get_project(&self, project_id: Uuid) -> Result<Project, StoreError>;

    async fn update_project_status(
        &self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<(), StoreError>;

    /// Delete a project and its pages; task records are kept
    async fn delete_project(&self, project_id: Uuid) -> Result<(), StoreError>;

    // =========================================================================
    // Pages
    // =========================================================================

    async fn create_page(&self, page: NewPage) -> Result<Page, StoreError>;

    async fn get_page(&self, page_id: Uuid) -> Result<Page, StoreError>;

    /// List a project's pages ordered by `order_index`
    async fn list_pages(&self, project_id: Uuid) -> Result<Vec<Page>, StoreError>;

    /// Write an item's output back to its page
    ///
    /// Returns `PageNotFound` if the page was deleted in the meantime.
    async fn apply_page_update(&self, page_id: Uuid, update: PageUpdate)
        -> Result<Page, StoreError>;

    async fn delete_page(&self, page_id: Uuid) -> Result<(), StoreError>;

    // =========================================================================
    // Task records
    // =========================================================================

    /// Create a `PENDING` task with progress `{total, 0, 0}`
    async fn create_task(&self, task: NewTask) -> Result<TaskRecord, StoreError>;

    async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError>;

    /// Move a task from `PENDING` to `RUNNING`
    async fn mark_task_running(&self, task_id: Uuid) -> Result<TaskRecord, StoreError>;

    /// Count one processed item and return the new progress
    ///
    /// Fails with `ProgressOverflow` once `completed + failed == total`.
    async fn record_item_outcome(
        &self,
        task_id: Uuid,
        succeeded: bool,
    ) -> Result<TaskProgress, StoreError>;

    /// Move a non-terminal task into a terminal status
    ///
    /// `progress`, when given, replaces the stored counters in the same write.
    /// It must keep the total and may only raise counters
    /// (`StoreError::InvalidProgress` otherwise).
    async fn finish_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        progress: Option<TaskProgress>,
        error: Option<TaskError>,
    ) -> Result<TaskRecord, StoreError>;
}
