//! Page description stage

use std::sync::Arc;

use async_trait::async_trait;
use deckgen_core::{DescriptionContent, GenerativeProvider, PageUpdate, TextRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::executor::{ItemFailure, WorkItem, WorkItemExecutor};

/// Input for one page description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionPayload {
    /// Fully assembled prompt for this page
    pub prompt: String,
}

/// Generates a page's description text
pub struct DescriptionExecutor {
    provider: Arc<dyn GenerativeProvider>,
}

impl DescriptionExecutor {
    pub fn new(provider: Arc<dyn GenerativeProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl WorkItemExecutor for DescriptionExecutor {
    type Payload = DescriptionPayload;

    fn name(&self) -> &'static str {
        "description"
    }

    async fn execute(&self, item: &WorkItem<DescriptionPayload>) -> Result<PageUpdate, ItemFailure> {
        if item.payload.prompt.trim().is_empty() {
            return Err(ItemFailure::input("description prompt is empty"));
        }

        let text = self
            .provider
            .generate_text(TextRequest::new(item.payload.prompt.clone()))
            .await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ItemFailure::external("provider returned an empty description"));
        }

        debug!(index = item.index, target = %item.target, chars = text.len(), "Description generated");
        Ok(PageUpdate::description(DescriptionContent::new(text)))
    }
}
