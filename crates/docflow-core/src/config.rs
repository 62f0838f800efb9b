//! Configuration for the engine and the folder watcher.

use serde::Deserialize;
use std::time::Duration;

/// Workflow engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Capacity of each instance actor's command mailbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Per-subscriber event buffer size
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl EngineConfig {
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer.max(1);
        self
    }
}

/// Folder watcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Seconds between folder polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl WatcherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

fn default_mailbox_capacity() -> usize {
    32
}

fn default_event_buffer() -> usize {
    256
}

fn default_poll_interval_secs() -> u64 {
    30
}
