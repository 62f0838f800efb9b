//! Folder watching for automatic workflow starts
//!
//! Each watched definition gets a polling loop over its source folder; files
//! not seen before are turned into documents and handed to the engine.
//! Delivery is at-least-once: a file only counts as seen after its instance
//! start succeeded, so transient failures are retried on the next poll.

pub mod watcher;

pub use watcher::{FolderWatcher, WatcherHandle};

use docflow_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("definition '{0}' has no source folder configured")]
    MissingSourceFolder(String),

    #[error("definition '{0}' does not auto-start on upload")]
    AutoStartDisabled(String),

    #[error("definition '{0}' is not being watched")]
    NotWatching(String),

    #[error("definition '{0}' is already being watched")]
    AlreadyWatching(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, WatcherError>;
