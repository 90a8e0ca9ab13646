// Record types shared by the store, the orchestrator and the worker binary
//
// Decision: Status strings are SCREAMING_SNAKE_CASE on the wire and in the database,
// matching what pollers already report to clients.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a status string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseStatusError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ============================================
// Projects (owning unit of work)
// ============================================

/// Lifecycle of a project through the generation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Draft,
    OutlineGenerated,
    GeneratingDescriptions,
    DescriptionsGenerated,
    GeneratingImages,
    Completed,
}

string_enum!(ProjectStatus, "project status", {
    Draft => "DRAFT",
    OutlineGenerated => "OUTLINE_GENERATED",
    GeneratingDescriptions => "GENERATING_DESCRIPTIONS",
    DescriptionsGenerated => "DESCRIPTIONS_GENERATED",
    GeneratingImages => "GENERATING_IMAGES",
    Completed => "COMPLETED",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub status: ProjectStatus,
    pub idea_prompt: Option<String>,
    pub extra_requirements: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub idea_prompt: Option<String>,
    pub extra_requirements: Option<String>,
    /// Initial status; `None` means `DRAFT`
    pub status: Option<ProjectStatus>,
}

// ============================================
// Pages (target records)
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageStatus {
    Draft,
    DescriptionGenerated,
    ImageGenerated,
}

string_enum!(PageStatus, "page status", {
    Draft => "DRAFT",
    DescriptionGenerated => "DESCRIPTION_GENERATED",
    ImageGenerated => "IMAGE_GENERATED",
});

/// Outline entry for one page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineContent {
    pub title: String,
    #[serde(default)]
    pub points: Vec<String>,
}

/// Generated description text for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionContent {
    pub text: String,
    pub generated_at: DateTime<Utc>,
}

impl DescriptionContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub project_id: Uuid,
    pub order_index: i32,
    pub part: Option<String>,
    pub outline_content: Option<OutlineContent>,
    pub description_content: Option<DescriptionContent>,
    pub generated_image_path: Option<String>,
    pub status: PageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewPage {
    pub project_id: Uuid,
    pub order_index: i32,
    pub part: Option<String>,
    pub outline_content: Option<OutlineContent>,
    pub description_content: Option<DescriptionContent>,
}

/// Write-back produced by one successful work item
///
/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageUpdate {
    pub description_content: Option<DescriptionContent>,
    pub generated_image_path: Option<String>,
    pub status: Option<PageStatus>,
}

impl PageUpdate {
    pub fn description(content: DescriptionContent) -> Self {
        Self {
            description_content: Some(content),
            generated_image_path: None,
            status: Some(PageStatus::DescriptionGenerated),
        }
    }

    pub fn image(path: impl Into<String>) -> Self {
        Self {
            description_content: None,
            generated_image_path: Some(path.into()),
            status: Some(PageStatus::ImageGenerated),
        }
    }

    /// Apply this update to a page in place
    pub fn apply_to(&self, page: &mut Page) {
        if let Some(content) = &self.description_content {
            page.description_content = Some(content.clone());
        }
        if let Some(path) = &self.generated_image_path {
            page.generated_image_path = Some(path.clone());
        }
        if let Some(status) = self.status {
            page.status = status;
        }
        page.updated_at = Utc::now();
    }
}

// ============================================
// Task records (one per submitted batch)
// ============================================

/// Pipeline stage a batch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    GenerateDescriptions,
    GenerateImages,
}

string_enum!(TaskType, "task type", {
    GenerateDescriptions => "GENERATE_DESCRIPTIONS",
    GenerateImages => "GENERATE_IMAGES",
});

impl TaskType {
    /// Project status while a batch of this type is in flight
    pub fn in_progress_status(&self) -> ProjectStatus {
        match self {
            Self::GenerateDescriptions => ProjectStatus::GeneratingDescriptions,
            Self::GenerateImages => ProjectStatus::GeneratingImages,
        }
    }

    /// Project status once at least one item of the batch succeeded
    pub fn finished_status(&self) -> ProjectStatus {
        match self {
            Self::GenerateDescriptions => ProjectStatus::DescriptionsGenerated,
            Self::GenerateImages => ProjectStatus::Completed,
        }
    }

    /// Project status to fall back to when the batch produced nothing
    pub fn fallback_status(&self) -> ProjectStatus {
        match self {
            Self::GenerateDescriptions => ProjectStatus::OutlineGenerated,
            Self::GenerateImages => ProjectStatus::DescriptionsGenerated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

string_enum!(TaskStatus, "task status", {
    Pending => "PENDING",
    Running => "RUNNING",
    Completed => "COMPLETED",
    CompletedWithErrors => "COMPLETED_WITH_ERRORS",
    Failed => "FAILED",
});

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed
        )
    }
}

/// Aggregate progress counters of a batch
///
/// `completed + failed` never decreases and never exceeds `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

impl TaskProgress {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
        }
    }

    pub fn processed(&self) -> u32 {
        self.completed + self.failed
    }

    pub fn is_exhausted(&self) -> bool {
        self.processed() >= self.total
    }

    /// Why `self` cannot replace `current` as a task's counters, if it cannot
    ///
    /// A replacement keeps the total, never lowers a counter and never
    /// exceeds the total.
    pub fn replacement_error(&self, current: &TaskProgress) -> Option<String> {
        if self.total != current.total {
            Some(format!("total {} does not match {}", self.total, current.total))
        } else if self.completed < current.completed || self.failed < current.failed {
            Some(format!(
                "counters {}/{} below stored {}/{}",
                self.completed, self.failed, current.completed, current.failed
            ))
        } else if self.processed() > self.total {
            Some(format!("{} processed of {}", self.processed(), self.total))
        } else {
            None
        }
    }

    /// Terminal status for a batch whose items have all been processed
    ///
    /// Decision: a batch in which every item failed is `FAILED`, not
    /// `COMPLETED_WITH_ERRORS`.
    pub fn terminal_status(&self) -> TaskStatus {
        if self.failed == 0 {
            TaskStatus::Completed
        } else if self.completed == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::CompletedWithErrors
        }
    }
}

/// Why a batch ended `FAILED`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskErrorKind {
    /// Batch-level check failed before any item ran
    PreconditionFailed,
    /// Every item of a non-empty batch failed
    AllItemsFailed,
    /// The process stopped while the batch was in flight
    Interrupted,
}

string_enum!(TaskErrorKind, "task error kind", {
    PreconditionFailed => "PRECONDITION_FAILED",
    AllItemsFailed => "ALL_ITEMS_FAILED",
    Interrupted => "INTERRUPTED",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::PreconditionFailed,
            message: message.into(),
        }
    }

    pub fn all_items_failed(total: u32) -> Self {
        Self {
            kind: TaskErrorKind::AllItemsFailed,
            message: format!("all {total} items failed"),
        }
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Interrupted,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub task_type: TaskType,
    pub owner_id: Uuid,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub owner_id: Uuid,
    pub total: u32,
}
