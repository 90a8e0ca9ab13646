//! In-memory implementation of RecordStore
//
// Decision: One RwLock over all three maps so a project delete cascades atomically.
// Decision: Deleting a project keeps its task records; pollers still see the outcome.
// Decision: Used for dev mode (no DATABASE_URL) and for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::*;
use crate::store::{RecordStore, StoreError};

#[derive(Default)]
struct State {
    projects: HashMap<Uuid, Project>,
    pages: HashMap<Uuid, Page>,
    tasks: HashMap<Uuid, TaskRecord>,
}

/// In-memory implementation of RecordStore
///
/// Provides the same semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use deckgen_core::InMemoryRecordStore;
///
/// let store = InMemoryRecordStore::new();
/// ```
pub struct InMemoryRecordStore {
    state: RwLock<State>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError> {
        let now = Utc::now();
        let record = Project {
            id: Uuid::now_v7(),
            status: project.status.unwrap_or(ProjectStatus::Draft),
            idea_prompt: project.idea_prompt,
            extra_requirements: project.extra_requirements,
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .projects
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Project, StoreError> {
        self.state
            .read()
            .projects
            .get(&project_id)
            .cloned()
            .ok_or(StoreError::ProjectNotFound(project_id))
    }

    async fn update_project_status(
        &self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or(StoreError::ProjectNotFound(project_id))?;
        project.status = status;
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_project(&self, project_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state
            .projects
            .remove(&project_id)
            .ok_or(StoreError::ProjectNotFound(project_id))?;
        state.pages.retain(|_, page| page.project_id != project_id);
        Ok(())
    }

    async fn create_page(&self, page: NewPage) -> Result<Page, StoreError> {
        let mut state = self.state.write();
        if !state.projects.contains_key(&page.project_id) {
            return Err(StoreError::ProjectNotFound(page.project_id));
        }

        let now = Utc::now();
        let status = if page.description_content.is_some() {
            PageStatus::DescriptionGenerated
        } else {
            PageStatus::Draft
        };
        let record = Page {
            id: Uuid::now_v7(),
            project_id: page.project_id,
            order_index: page.order_index,
            part: page.part,
            outline_content: page.outline_content,
            description_content: page.description_content,
            generated_image_path: None,
            status,
            created_at: now,
            updated_at: now,
        };
        state.pages.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_page(&self, page_id: Uuid) -> Result<Page, StoreError> {
        self.state
            .read()
            .pages
            .get(&page_id)
            .cloned()
            .ok_or(StoreError::PageNotFound(page_id))
    }

    async fn list_pages(&self, project_id: Uuid) -> Result<Vec<Page>, StoreError> {
        let state = self.state.read();
        let mut pages: Vec<Page> = state
            .pages
            .values()
            .filter(|page| page.project_id == project_id)
            .cloned()
            .collect();
        pages.sort_by_key(|page| (page.order_index, page.id));
        Ok(pages)
    }

    async fn apply_page_update(
        &self,
        page_id: Uuid,
        update: PageUpdate,
    ) -> Result<Page, StoreError> {
        let mut state = self.state.write();
        let page = state
            .pages
            .get_mut(&page_id)
            .ok_or(StoreError::PageNotFound(page_id))?;
        update.apply_to(page);
        Ok(page.clone())
    }

    async fn delete_page(&self, page_id: Uuid) -> Result<(), StoreError> {
        self.state
            .write()
            .pages
            .remove(&page_id)
            .map(|_| ())
            .ok_or(StoreError::PageNotFound(page_id))
    }

    async fn create_task(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        let record = TaskRecord {
            id: Uuid::now_v7(),
            task_type: task.task_type,
            owner_id: task.owner_id,
            status: TaskStatus::Pending,
            progress: TaskProgress::new(task.total),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.state.write().tasks.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        self.state
            .read()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn mark_task_running(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        let mut state = self.state.write();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        if task.status != TaskStatus::Pending {
            return Err(StoreError::InvalidTransition {
                task_id,
                from: task.status,
                to: TaskStatus::Running,
            });
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn record_item_outcome(
        &self,
        task_id: Uuid,
        succeeded: bool,
    ) -> Result<TaskProgress, StoreError> {
        let mut state = self.state.write();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        if task.progress.is_exhausted() {
            return Err(StoreError::ProgressOverflow {
                task_id,
                total: task.progress.total,
            });
        }
        if succeeded {
            task.progress.completed += 1;
        } else {
            task.progress.failed += 1;
        }
        Ok(task.progress)
    }

    async fn finish_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        progress: Option<TaskProgress>,
        error: Option<TaskError>,
    ) -> Result<TaskRecord, StoreError> {
        let mut state = self.state.write();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        if !status.is_terminal() || task.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                task_id,
                from: task.status,
                to: status,
            });
        }
        if let Some(progress) = progress {
            if let Some(reason) = progress.replacement_error(&task.progress) {
                return Err(StoreError::InvalidProgress { task_id, reason });
            }
            task.progress = progress;
        }
        task.status = status;
        task.error = error;
        task.completed_at = Some(Utc::now());
        Ok(task.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_project(store: &InMemoryRecordStore) -> Project {
        store
            .create_project(NewProject {
                idea_prompt: Some("A deck about tides".into()),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_project() {
        let store = InMemoryRecordStore::new();
        let project = seed_project(&store).await;

        assert_eq!(project.status, ProjectStatus::Draft);
        let fetched = store.get_project(project.id).await.unwrap();
        assert_eq!(fetched.idea_prompt.as_deref(), Some("A deck about tides"));
    }

    #[tokio::test]
    async fn test_list_pages_is_ordered() {
        let store = InMemoryRecordStore::new();
        let project = seed_project(&store).await;
        for order_index in [2, 0, 1] {
            store
                .create_page(NewPage {
                    project_id: project.id,
                    order_index,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let pages = store.list_pages(project.id).await.unwrap();
        let order: Vec<i32> = pages.iter().map(|p| p.order_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_create_page_requires_project() {
        let store = InMemoryRecordStore::new();
        let result = store
            .create_page(NewPage {
                project_id: Uuid::now_v7(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(StoreError::ProjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_apply_update_to_deleted_page() {
        let store = InMemoryRecordStore::new();
        let project = seed_project(&store).await;
        let page = store
            .create_page(NewPage {
                project_id: project.id,
                ..Default::default()
            })
            .await
            .unwrap();
        store.delete_page(page.id).await.unwrap();

        let result = store
            .apply_page_update(page.id, PageUpdate::image("x.png"))
            .await;
        assert!(matches!(result, Err(StoreError::PageNotFound(id)) if id == page.id));
    }

    #[tokio::test]
    async fn test_delete_project_cascades_pages_keeps_tasks() {
        let store = InMemoryRecordStore::new();
        let project = seed_project(&store).await;
        let page = store
            .create_page(NewPage {
                project_id: project.id,
                ..Default::default()
            })
            .await
            .unwrap();
        let task = store
            .create_task(NewTask {
                task_type: TaskType::GenerateDescriptions,
                owner_id: project.id,
                total: 1,
            })
            .await
            .unwrap();

        store.delete_project(project.id).await.unwrap();

        assert!(store.get_project(project.id).await.unwrap_err().is_not_found());
        assert!(store.get_page(page.id).await.unwrap_err().is_not_found());
        assert_eq!(store.get_task(task.id).await.unwrap().owner_id, project.id);
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let store = InMemoryRecordStore::new();
        let project = seed_project(&store).await;
        let task = store
            .create_task(NewTask {
                task_type: TaskType::GenerateImages,
                owner_id: project.id,
                total: 2,
            })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, TaskProgress::new(2));

        let running = store.mark_task_running(task.id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert!(running.started_at.is_some());

        store.record_item_outcome(task.id, true).await.unwrap();
        let progress = store.record_item_outcome(task.id, false).await.unwrap();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, 1);

        let finished = store
            .finish_task(task.id, progress.terminal_status(), None, None)
            .await
            .unwrap();
        assert_eq!(finished.status, TaskStatus::CompletedWithErrors);
        assert!(finished.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_cannot_exceed_total() {
        let store = InMemoryRecordStore::new();
        let task = store
            .create_task(NewTask {
                task_type: TaskType::GenerateDescriptions,
                owner_id: Uuid::now_v7(),
                total: 1,
            })
            .await
            .unwrap();

        store.record_item_outcome(task.id, true).await.unwrap();
        let result = store.record_item_outcome(task.id, true).await;

        assert!(matches!(result, Err(StoreError::ProgressOverflow { total: 1, .. })));
        assert_eq!(store.get_task(task.id).await.unwrap().progress.completed, 1);
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected() {
        let store = InMemoryRecordStore::new();
        let task = store
            .create_task(NewTask {
                task_type: TaskType::GenerateDescriptions,
                owner_id: Uuid::now_v7(),
                total: 1,
            })
            .await
            .unwrap();

        // Not terminal
        let result = store.finish_task(task.id, TaskStatus::Running, None, None).await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));

        store
            .finish_task(task.id, TaskStatus::Failed, None, Some(TaskError::precondition("empty")))
            .await
            .unwrap();

        // Already terminal
        let result = store.finish_task(task.id, TaskStatus::Completed, None, None).await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
        let result = store.mark_task_running(task.id).await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_finish_task_persists_final_progress() {
        let store = InMemoryRecordStore::new();
        let task = store
            .create_task(NewTask {
                task_type: TaskType::GenerateDescriptions,
                owner_id: Uuid::now_v7(),
                total: 3,
            })
            .await
            .unwrap();
        store.mark_task_running(task.id).await.unwrap();
        store.record_item_outcome(task.id, true).await.unwrap();

        // Lowering a counter is rejected and leaves the task running
        let lowered = TaskProgress {
            total: 3,
            completed: 0,
            failed: 3,
        };
        let result = store
            .finish_task(task.id, TaskStatus::Failed, Some(lowered), None)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidProgress { .. })));
        assert_eq!(store.get_task(task.id).await.unwrap().status, TaskStatus::Running);

        let full = TaskProgress {
            total: 3,
            completed: 3,
            failed: 0,
        };
        let finished = store
            .finish_task(task.id, TaskStatus::Completed, Some(full), None)
            .await
            .unwrap();
        assert_eq!(finished.progress, full);
        assert_eq!(store.get_task(task.id).await.unwrap().progress.processed(), 3);
    }
}
