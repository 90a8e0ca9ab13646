// Deckgen Tasks
//
// Generation task orchestration: a batch of per-page work items runs through a
// bounded worker pool while its task record tracks progress for pollers.
//
// Layers, leaf first:
// - executor: one work item, single attempt, classified failure
// - pool: at most K items in flight, one callback per item
// - orchestrator: task record lifecycle around a pool run
// - registry / gateway: background scheduling, one batch per project
// - launcher: request-layer entry point

pub mod executor;
pub mod gateway;
pub mod launcher;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod stages;

#[cfg(test)]
mod testing;

pub use executor::{
    execute_with_timeout, FailureKind, ItemFailure, WorkItem, WorkItemExecutor,
};
pub use gateway::SubmissionGateway;
pub use launcher::{BatchLauncher, LaunchError};
pub use orchestrator::{BatchReport, FailedItem, OrchestratorError, TaskOrchestrator};
pub use pool::{BoundedWorkerPool, PoolError, PoolResult, ResultHandler, WorkerFault};
pub use registry::{ActiveTask, SubmitError, TaskRegistry};
pub use stages::{
    DescriptionExecutor, DescriptionPayload, ImageExecutor, ImagePayload, PageImageStore,
};
