//! Page image files under the upload folder

use std::path::{Path, PathBuf};

use chrono::Utc;
use deckgen_core::ImageData;
use tracing::debug;
use uuid::Uuid;

/// Writes generated page images to `{root}/{project_id}/pages/`
#[derive(Debug, Clone)]
pub struct PageImageStore {
    root: PathBuf,
}

impl PageImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save an image and return its path relative to the root
    ///
    /// File names are `{page_id}_{unix_timestamp}.{ext}`, so a regenerated
    /// image never overwrites the previous one.
    pub async fn save(
        &self,
        project_id: Uuid,
        page_id: Uuid,
        image: &ImageData,
    ) -> std::io::Result<String> {
        let relative_dir = format!("{project_id}/pages");
        let dir = self.root.join(&relative_dir);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!(
            "{page_id}_{}.{}",
            Utc::now().timestamp(),
            image.extension()
        );
        tokio::fs::write(dir.join(&file_name), &image.data).await?;

        let relative = format!("{relative_dir}/{file_name}");
        debug!(path = %relative, bytes = image.data.len(), "Page image saved");
        Ok(relative)
    }

    /// Delete an image saved by [`save`](Self::save)
    pub async fn remove(&self, relative: &str) -> std::io::Result<()> {
        tokio::fs::remove_file(self.resolve(relative)).await
    }

    /// Absolute location of a path returned by [`save`](Self::save)
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Guess an image MIME type from a file name or URL path
pub fn mime_for_path(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    let lower = lower.split(['?', '#']).next().unwrap_or_default();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else {
        "image/png"
    }
}
