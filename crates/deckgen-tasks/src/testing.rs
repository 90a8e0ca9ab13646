// Scripted provider and fault-injecting store shared by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deckgen_core::{
    GeneratedImage, GenerativeProvider, ImageRequest, InMemoryRecordStore, NewPage, NewProject,
    NewTask, Page, PageUpdate, Project, ProjectStatus, ProviderError, RecordStore, StoreError,
    TaskError, TaskProgress, TaskRecord, TaskStatus, TextRequest,
};
use parking_lot::Mutex;
use uuid::Uuid;

/// Answers every call with the same scripted result and records the requests
pub(crate) struct ScriptedProvider {
    text: Result<String, ProviderError>,
    image: Result<GeneratedImage, ProviderError>,
    text_prompts: Mutex<Vec<String>>,
    image_requests: Mutex<Vec<ImageRequest>>,
}

impl ScriptedProvider {
    fn new(
        text: Result<String, ProviderError>,
        image: Result<GeneratedImage, ProviderError>,
    ) -> Self {
        Self {
            text,
            image,
            text_prompts: Mutex::new(Vec::new()),
            image_requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn text(result: Result<String, ProviderError>) -> Self {
        Self::new(result, Err(ProviderError::NotConfigured("image".into())))
    }

    pub(crate) fn image(result: Result<GeneratedImage, ProviderError>) -> Self {
        Self::new(Err(ProviderError::NotConfigured("text".into())), result)
    }

    pub(crate) fn text_prompts(&self) -> Vec<String> {
        self.text_prompts.lock().clone()
    }

    pub(crate) fn image_requests(&self) -> Vec<ImageRequest> {
        self.image_requests.lock().clone()
    }
}

#[async_trait]
impl GenerativeProvider for ScriptedProvider {
    async fn generate_text(&self, request: TextRequest) -> Result<String, ProviderError> {
        self.text_prompts.lock().push(request.prompt);
        self.text.clone()
    }

    async fn generate_image(
        &self,
        request: ImageRequest,
    ) -> Result<GeneratedImage, ProviderError> {
        self.image_requests.lock().push(request);
        self.image.clone()
    }
}

/// In-memory store that loses counter increments or stalls project updates
pub(crate) struct FaultyStore {
    inner: InMemoryRecordStore,
    lost_increments: AtomicUsize,
    status_delay: Duration,
}

impl FaultyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            lost_increments: AtomicUsize::new(0),
            status_delay: Duration::ZERO,
        }
    }

    /// Fail the next `count` calls to `record_item_outcome`
    pub(crate) fn losing_increments(self, count: usize) -> Self {
        self.lost_increments.store(count, Ordering::SeqCst);
        self
    }

    /// Delay every `update_project_status`
    pub(crate) fn slow_status_updates(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub(crate) fn inner(&self) -> &InMemoryRecordStore {
        &self.inner
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError> {
        self.inner.create_project(project).await
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Project, StoreError> {
        self.inner.get_project(project_id).await
    }

    async fn update_project_status(
        &self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<(), StoreError> {
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        self.inner.update_project_status(project_id, status).await
    }

    async fn delete_project(&self, project_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_project(project_id).await
    }

    async fn create_page(&self, page: NewPage) -> Result<Page, StoreError> {
        self.inner.create_page(page).await
    }

    async fn get_page(&self, page_id: Uuid) -> Result<Page, StoreError> {
        self.inner.get_page(page_id).await
    }

    async fn list_pages(&self, project_id: Uuid) -> Result<Vec<Page>, StoreError> {
        self.inner.list_pages(project_id).await
    }

    async fn apply_page_update(
        &self,
        page_id: Uuid,
        update: PageUpdate,
    ) -> Result<Page, StoreError> {
        self.inner.apply_page_update(page_id, update).await
    }

    async fn delete_page(&self, page_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_page(page_id).await
    }

    async fn create_task(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        self.inner.create_task(task).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        self.inner.get_task(task_id).await
    }

    async fn mark_task_running(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        self.inner.mark_task_running(task_id).await
    }

    async fn record_item_outcome(
        &self,
        task_id: Uuid,
        succeeded: bool,
    ) -> Result<TaskProgress, StoreError> {
        let lost = self
            .lost_increments
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(StoreError::Database("connection reset".into()));
        }
        self.inner.record_item_outcome(task_id, succeeded).await
    }

    async fn finish_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        progress: Option<TaskProgress>,
        error: Option<TaskError>,
    ) -> Result<TaskRecord, StoreError> {
        self.inner.finish_task(task_id, status, progress, error).await
    }
}
