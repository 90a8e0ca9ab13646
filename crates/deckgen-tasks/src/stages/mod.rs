//! Concrete work item executors for the two generation stages

mod description;
mod files;
mod image;

pub use description::{DescriptionExecutor, DescriptionPayload};
pub use files::{mime_for_path, PageImageStore};
pub use image::{ImageExecutor, ImagePayload};
