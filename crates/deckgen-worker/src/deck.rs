//! Deck definition files
//!
//! A deck file lists the pages of one project together with caller-built
//! prompts. Relative asset paths are resolved against the deck file's
//! directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deckgen_core::{
    DescriptionContent, NewPage, NewProject, OutlineContent, Page, ProjectStatus,
};
use deckgen_tasks::{DescriptionPayload, ImagePayload, WorkItem};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Deck {
    #[serde(default)]
    pub idea_prompt: Option<String>,
    #[serde(default)]
    pub extra_requirements: Option<String>,
    /// Template image sent ahead of every image prompt
    #[serde(default)]
    pub template_image: Option<PathBuf>,
    /// Extra reference images: http(s) URLs or local paths
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    pub pages: Vec<DeckPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeckPage {
    pub title: String,
    #[serde(default)]
    pub points: Vec<String>,
    #[serde(default)]
    pub part: Option<String>,
    #[serde(default)]
    pub description_prompt: String,
    /// Falls back to the page's generated description
    #[serde(default)]
    pub image_prompt: Option<String>,
    /// Pre-written description, for running the image stage alone
    #[serde(default)]
    pub description: Option<String>,
}

/// Output settings for the image stage
#[derive(Debug, Clone)]
pub struct ImageDefaults {
    pub aspect_ratio: String,
    pub resolution: String,
}

impl Deck {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deck file {}", path.display()))?;
        let mut deck: Deck = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid deck file {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        deck.resolve_paths(base);
        Ok(deck)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if let Some(template) = self.template_image.take() {
            self.template_image = Some(if template.is_relative() {
                base.join(template)
            } else {
                template
            });
        }
        for source in &mut self.reference_images {
            let is_url = source.starts_with("http://") || source.starts_with("https://");
            if !is_url && Path::new(source.as_str()).is_relative() {
                *source = base.join(source.as_str()).to_string_lossy().into_owned();
            }
        }
    }

    pub fn new_project(&self, initial: ProjectStatus) -> NewProject {
        NewProject {
            idea_prompt: self.idea_prompt.clone(),
            extra_requirements: self.extra_requirements.clone(),
            status: Some(initial),
        }
    }

    pub fn new_pages(&self, project_id: Uuid) -> Vec<NewPage> {
        self.pages
            .iter()
            .enumerate()
            .map(|(index, page)| NewPage {
                project_id,
                order_index: index as i32,
                part: page.part.clone(),
                outline_content: Some(OutlineContent {
                    title: page.title.clone(),
                    points: page.points.clone(),
                }),
                description_content: page.description.clone().map(DescriptionContent::new),
            })
            .collect()
    }

    fn deck_page(&self, page: &Page) -> Option<&DeckPage> {
        usize::try_from(page.order_index)
            .ok()
            .and_then(|i| self.pages.get(i))
    }

    /// One description item per stored page, in page order
    pub fn description_items(&self, pages: &[Page]) -> Vec<WorkItem<DescriptionPayload>> {
        pages
            .iter()
            .enumerate()
            .map(|(index, page)| {
                let prompt = self
                    .deck_page(page)
                    .map(|p| p.description_prompt.clone())
                    .unwrap_or_default();
                WorkItem::new(index, page.id, DescriptionPayload { prompt })
            })
            .collect()
    }

    /// One image item per stored page, in page order
    ///
    /// A page with neither an image prompt nor a description gets an empty
    /// prompt and fails on its own.
    pub fn image_items(
        &self,
        project_id: Uuid,
        pages: &[Page],
        defaults: &ImageDefaults,
    ) -> Vec<WorkItem<ImagePayload>> {
        pages
            .iter()
            .enumerate()
            .map(|(index, page)| {
                let prompt = self
                    .deck_page(page)
                    .and_then(|p| p.image_prompt.clone())
                    .or_else(|| page.description_content.as_ref().map(|d| d.text.clone()))
                    .unwrap_or_default();
                let payload = ImagePayload {
                    project_id,
                    prompt,
                    template_path: self.template_image.clone(),
                    reference_images: self.reference_images.clone(),
                    aspect_ratio: self
                        .aspect_ratio
                        .clone()
                        .unwrap_or_else(|| defaults.aspect_ratio.clone()),
                    resolution: self
                        .resolution
                        .clone()
                        .unwrap_or_else(|| defaults.resolution.clone()),
                };
                WorkItem::new(index, page.id, payload)
            })
            .collect()
    }
}
