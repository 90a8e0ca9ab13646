//! Page image stage
//
// Decision: The template image is required when configured (unreadable -> INPUT_ERROR);
//           extra references are best effort and skipped with a warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deckgen_core::{GenerativeProvider, ImageData, ImageRequest, PageUpdate, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::files::{mime_for_path, PageImageStore};
use crate::executor::{ItemFailure, WorkItem, WorkItemExecutor};

/// Input for one page image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub project_id: Uuid,
    /// Fully assembled prompt for this page
    pub prompt: String,
    /// Local template image sent ahead of the prompt
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    /// Extra references: http(s) URLs or local paths
    #[serde(default)]
    pub reference_images: Vec<String>,
    pub aspect_ratio: String,
    pub resolution: String,
}

const REFERENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Generates a page image and stores it under the upload folder
pub struct ImageExecutor {
    provider: Arc<dyn GenerativeProvider>,
    files: PageImageStore,
    http: reqwest::Client,
}

impl ImageExecutor {
    pub fn new(
        provider: Arc<dyn GenerativeProvider>,
        files: PageImageStore,
    ) -> Result<Self, ProviderError> {
        Self::with_reference_timeout(provider, files, REFERENCE_TIMEOUT)
    }

    /// Like [`new`](Self::new) with a custom deadline for fetching reference URLs
    pub fn with_reference_timeout(
        provider: Arc<dyn GenerativeProvider>,
        files: PageImageStore,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("reference http client: {e}")))?;
        Ok(Self {
            provider,
            files,
            http,
        })
    }

    async fn load_template(&self, path: &Path) -> Result<ImageData, ItemFailure> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            ItemFailure::input(format!("template image {} unreadable: {e}", path.display()))
        })?;
        Ok(ImageData {
            mime_type: mime_for_path(&path.to_string_lossy()).to_string(),
            data,
        })
    }

    async fn load_reference(&self, source: &str) -> Result<ImageData, String> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let response = self
                .http
                .get(source)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| e.to_string())?;
            let mime_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .filter(|v| v.starts_with("image/"))
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .unwrap_or_else(|| mime_for_path(source).to_string());
            let data = response.bytes().await.map_err(|e| e.to_string())?;
            Ok(ImageData {
                mime_type,
                data: data.to_vec(),
            })
        } else {
            let data = tokio::fs::read(source).await.map_err(|e| e.to_string())?;
            Ok(ImageData {
                mime_type: mime_for_path(source).to_string(),
                data,
            })
        }
    }
}

#[async_trait]
impl WorkItemExecutor for ImageExecutor {
    type Payload = ImagePayload;

    fn name(&self) -> &'static str {
        "image"
    }

    async fn execute(&self, item: &WorkItem<ImagePayload>) -> Result<PageUpdate, ItemFailure> {
        let payload = &item.payload;
        if payload.prompt.trim().is_empty() {
            return Err(ItemFailure::input("image prompt is empty"));
        }

        let template = match &payload.template_path {
            Some(path) => Some(self.load_template(path).await?),
            None => None,
        };

        let mut reference_images = Vec::with_capacity(payload.reference_images.len());
        for source in &payload.reference_images {
            match self.load_reference(source).await {
                Ok(image) => reference_images.push(image),
                Err(e) => warn!(
                    index = item.index,
                    target = %item.target,
                    source = %source,
                    error = %e,
                    "Skipping unreadable reference image"
                ),
            }
        }

        let image = self
            .provider
            .generate_image(ImageRequest {
                prompt: payload.prompt.clone(),
                template,
                reference_images,
                aspect_ratio: payload.aspect_ratio.clone(),
                resolution: payload.resolution.clone(),
            })
            .await?;

        let path = self
            .files
            .save(payload.project_id, item.target, &image)
            .await
            .map_err(|e| ItemFailure::storage(format!("failed to write page image: {e}")))?;

        debug!(index = item.index, target = %item.target, path = %path, "Image generated");
        Ok(PageUpdate::image(path))
    }

    async fn discard(&self, update: &PageUpdate) {
        let Some(path) = update.generated_image_path.as_deref() else {
            return;
        };
        match self.files.remove(path).await {
            Ok(()) => debug!(path = %path, "Discarded page image without a page"),
            Err(e) => warn!(path = %path, error = %e, "Failed to discard page image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FailureKind;
    use crate::testing::ScriptedProvider;
    use deckgen_core::{PageStatus, ProviderError};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png() -> ImageData {
        ImageData {
            mime_type: "image/png".to_string(),
            data: vec![0x89, b'P', b'N', b'G'],
        }
    }

    fn payload(project_id: Uuid) -> ImagePayload {
        ImagePayload {
            project_id,
            prompt: "A lighthouse at dusk".to_string(),
            template_path: None,
            reference_images: vec![],
            aspect_ratio: "16:9".to_string(),
            resolution: "2K".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_saves_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::image(Ok(png())));
        let executor = ImageExecutor::new(provider.clone(), PageImageStore::new(dir.path())).unwrap();
        let (project_id, page_id) = (Uuid::now_v7(), Uuid::now_v7());

        let update = executor
            .execute(&WorkItem::new(0, page_id, payload(project_id)))
            .await
            .unwrap();

        assert_eq!(update.status, Some(PageStatus::ImageGenerated));
        let relative = update.generated_image_path.unwrap();
        assert!(relative.starts_with(&format!("{project_id}/pages/{page_id}_")));
        assert!(dir.path().join(&relative).exists());

        let requests = provider.image_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].aspect_ratio, "16:9");
        assert!(requests[0].template.is_none());
    }

    #[tokio::test]
    async fn test_missing_template_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::image(Ok(png())));
        let executor = ImageExecutor::new(provider.clone(), PageImageStore::new(dir.path())).unwrap();
        let mut payload = payload(Uuid::now_v7());
        payload.template_path = Some(dir.path().join("missing-template.png"));

        let failure = executor
            .execute(&WorkItem::new(0, Uuid::now_v7(), payload))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::InputError);
        assert!(provider.image_requests().is_empty());
    }

    #[tokio::test]
    async fn test_references_loaded_and_failures_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ref.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.png");
        std::fs::write(&template, [9u8, 9, 9]).unwrap();

        let provider = Arc::new(ScriptedProvider::image(Ok(png())));
        let executor = ImageExecutor::new(provider.clone(), PageImageStore::new(dir.path())).unwrap();
        let mut payload = payload(Uuid::now_v7());
        payload.template_path = Some(template);
        payload.reference_images = vec![
            format!("{}/ref.jpg", server.uri()),
            format!("{}/gone.png", server.uri()),
            dir.path().join("nope.png").to_string_lossy().into_owned(),
        ];

        executor
            .execute(&WorkItem::new(0, Uuid::now_v7(), payload))
            .await
            .unwrap();

        let request = provider.image_requests().remove(0);
        assert_eq!(request.template.unwrap().data, vec![9u8, 9, 9]);
        assert_eq!(request.reference_images.len(), 1);
        assert_eq!(request.reference_images[0].mime_type, "image/jpeg");
        assert_eq!(request.reference_images[0].data, vec![1u8, 2, 3]);
    }

    #[tokio::test]
    async fn test_provider_without_image_is_external_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::image(Err(ProviderError::InvalidResponse(
            "no image part".into(),
        ))));
        let executor = ImageExecutor::new(provider, PageImageStore::new(dir.path())).unwrap();

        let failure = executor
            .execute(&WorkItem::new(0, Uuid::now_v7(), payload(Uuid::now_v7())))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::ExternalServiceError);
    }

    #[tokio::test]
    async fn test_unwritable_folder_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the upload folder should be
        let blocked = dir.path().join("uploads");
        std::fs::write(&blocked, b"not a directory").unwrap();
        let provider = Arc::new(ScriptedProvider::image(Ok(png())));
        let executor = ImageExecutor::new(provider, PageImageStore::new(&blocked)).unwrap();

        let failure = executor
            .execute(&WorkItem::new(0, Uuid::now_v7(), payload(Uuid::now_v7())))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::StorageError);
    }

    #[tokio::test]
    async fn test_slow_reference_is_skipped_after_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_bytes(vec![1u8]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::image(Ok(png())));
        let executor = ImageExecutor::with_reference_timeout(
            provider.clone(),
            PageImageStore::new(dir.path()),
            Duration::from_millis(100),
        )
        .unwrap();
        let mut payload = payload(Uuid::now_v7());
        payload.reference_images = vec![format!("{}/slow.png", server.uri())];

        executor
            .execute(&WorkItem::new(0, Uuid::now_v7(), payload))
            .await
            .unwrap();

        assert!(provider.image_requests()[0].reference_images.is_empty());
    }

    #[tokio::test]
    async fn test_discard_removes_saved_image() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::image(Ok(png())));
        let executor = ImageExecutor::new(provider, PageImageStore::new(dir.path())).unwrap();

        let update = executor
            .execute(&WorkItem::new(0, Uuid::now_v7(), payload(Uuid::now_v7())))
            .await
            .unwrap();
        let saved = dir.path().join(update.generated_image_path.as_deref().unwrap());
        assert!(saved.exists());

        executor.discard(&update).await;
        assert!(!saved.exists());

        // Nothing to remove is not an error
        executor.discard(&PageUpdate::default()).await;
    }
}
