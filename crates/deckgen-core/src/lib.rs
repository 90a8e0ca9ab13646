// Deckgen Core
//
// Records, storage and provider contracts shared by every deckgen crate.

pub mod config;
pub mod memory;
pub mod models;
pub mod provider;
pub mod store;
pub mod telemetry;

pub use config::{AppConfig, ConfigError, ProviderConfig};
pub use memory::InMemoryRecordStore;
pub use models::*;
pub use provider::{
    GeneratedImage, GenerativeProvider, ImageData, ImageRequest, ProviderError, TextRequest,
};
pub use store::{RecordStore, StoreError};
pub use telemetry::{init_telemetry, TelemetryConfig};
