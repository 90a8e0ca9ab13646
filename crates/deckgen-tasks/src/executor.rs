//! WorkItem executor contract
//!
//! An executor performs one unit of work (one page's description or image)
//! and always answers with a success value or a classified [`ItemFailure`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use deckgen_core::{PageUpdate, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// One unit of work inside a batch
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    /// Position in the batch (0-based), for ordering and log correlation
    pub index: usize,
    /// Page the output is written back to
    pub target: Uuid,
    /// Input for the external call
    pub payload: P,
}

impl<P> WorkItem<P> {
    pub fn new(index: usize, target: Uuid, payload: P) -> Self {
        Self {
            index,
            target,
            payload,
        }
    }
}

/// Classification of a failed work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Provider returned an error or malformed output
    ExternalServiceError,
    /// The call exceeded its deadline
    Timeout,
    /// A required input asset was missing or unreadable
    InputError,
    /// The target record vanished before write-back
    ResourceNotFound,
    /// Persisting the output failed for another reason
    StorageError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalServiceError => "EXTERNAL_SERVICE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::InputError => "INPUT_ERROR",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::StorageError => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for work item failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ExternalServiceError, message)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("work item exceeded {limit:?}"),
        )
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InputError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ResourceNotFound, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(FailureKind::StorageError, message)
    }
}

impl From<ProviderError> for ItemFailure {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout => Self::new(FailureKind::Timeout, err.to_string()),
            other => Self::external(other.to_string()),
        }
    }
}

/// Performs one work item against an external provider
///
/// Implementations make a single attempt and convert every fault into an
/// [`ItemFailure`]. Side effects on failure are limited to logging.
#[async_trait]
pub trait WorkItemExecutor: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn execute(&self, item: &WorkItem<Self::Payload>) -> Result<PageUpdate, ItemFailure>;

    /// Undo what a successful `execute` left outside the record store
    ///
    /// Called when the update it returned could not be written back.
    async fn discard(&self, _update: &PageUpdate) {}
}

/// Run an executor under a call-level deadline
///
/// Expiry is reported as a `TIMEOUT` failure; the in-flight call is dropped.
pub async fn execute_with_timeout<E>(
    executor: &E,
    item: &WorkItem<E::Payload>,
    limit: Duration,
) -> Result<PageUpdate, ItemFailure>
where
    E: WorkItemExecutor + ?Sized,
{
    match tokio::time::timeout(limit, executor.execute(item)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(
                executor = executor.name(),
                index = item.index,
                target = %item.target,
                limit_ms = limit.as_millis() as u64,
                "Work item timed out"
            );
            Err(ItemFailure::timeout(limit))
        }
    }
}
