use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by every collection opened through a [`crate::Database`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// File extension appended to collection names that lack it
    pub extension: String,
    /// Minimum spacing between physical flushes, and the period of the
    /// pending-drain tick. Zero disables batching.
    pub flush_interval_ms: u64,
    /// Quiet period a burst of watch events must settle for
    pub watch_debounce_ms: u64,
    /// Reload the collection when its file is edited externally
    pub watch: bool,
    /// Indentation used when writing collection files (0 = compact)
    pub indent: usize,
    /// Generator for identifiers of documents that arrive without one
    pub id_strategy: IdStrategy,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            extension: "json".to_string(),
            flush_interval_ms: 1000,
            watch_debounce_ms: 10,
            watch: true,
            indent: 4,
            id_strategy: IdStrategy::Uuid,
        }
    }
}

impl Options {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Whether mutations are batched behind the flush interval.
    pub fn batching(&self) -> bool {
        self.flush_interval_ms > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Uuid,
    Ulid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Ulid => ulid::Ulid::new().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}
