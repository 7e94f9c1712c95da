mod batch;
mod formatters;
mod sinks;
pub mod subscriber;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use batch::{BatchLogger, MAX_BATCH_SIZE};
pub use formatters::{JsonFormatter, LineFormatter};
pub use sinks::{CloudWatchSink, NullSink, StderrSink};

/// A single log record destined for the remote backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub level: String,
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: level.into(),
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

pub trait LogFormatter: Sync + Send {
    fn format(&self, entry: &LogEntry) -> String;
}

/// Destination for flushed log entries.
///
/// Only the [`BatchLogger`] worker calls into a sink, one entry at a time, so
/// implementations are free to keep mutable connection state. `flush` runs once
/// after every batch.
#[async_trait]
pub trait LogSink: Send {
    async fn send(&mut self, entry: &LogEntry) -> eyre::Result<()>;

    async fn flush(&mut self) -> eyre::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LogSink for Box<dyn LogSink> {
    async fn send(&mut self, entry: &LogEntry) -> eyre::Result<()> {
        (**self).send(entry).await
    }

    async fn flush(&mut self) -> eyre::Result<()> {
        (**self).flush().await
    }
}
