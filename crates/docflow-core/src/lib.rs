//! Core building blocks for the docflow validation engine
//!
//! This crate provides:
//! - Shared document and file types used across engine, watcher and adapters
//! - The in-process event bus (bounded channel per subscriber)
//! - Configuration structs with sensible defaults
//! - Tracing/logging setup

pub mod config;
pub mod events;
pub mod telemetry;
pub mod types;

pub use config::{EngineConfig, WatcherConfig};
pub use events::{EventBus, EventKind, Subscription, WorkflowEvent};
pub use telemetry::init_tracing;
pub use types::{DocumentRecord, FileRef};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
