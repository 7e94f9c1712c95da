//! Batched shipping of log entries to a [`LogSink`].
//!
//! Producers push entries onto a bounded channel sized at twice the batch
//! size. A single worker task owns the buffer and the sink, and flushes when
//! the buffer reaches the batch size, when the flush interval elapses, or when
//! the logger is closed. A full channel makes producers wait.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{LogEntry, LogSink};

/// Largest accepted batch. Matches the `PutLogEvents` per-call event limit.
pub const MAX_BATCH_SIZE: usize = 10_000;

pub struct BatchLogger {
    sender: mpsc::Sender<LogEntry>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchLogger {
    /// Spawns the worker task on the current tokio runtime.
    ///
    /// `batch_size` is clamped to `1..=MAX_BATCH_SIZE`.
    pub fn spawn<S>(sink: S, batch_size: usize, flush_interval: Duration) -> Self
    where
        S: LogSink + 'static,
    {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let (sender, receiver) = mpsc::channel(batch_size * 2);
        let shutdown = CancellationToken::new();

        let worker = Worker {
            sink,
            receiver,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            flush_interval,
        };
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        Self {
            sender,
            shutdown,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Enqueues an entry, waiting while the channel is full.
    ///
    /// Entries logged after [`BatchLogger::close`] are dropped.
    pub async fn log(&self, entry: LogEntry) {
        if self.sender.send(entry).await.is_err() {
            tracing::warn!("batch logger is closed, dropping log entry");
        }
    }

    /// Stops the worker after flushing everything enqueued so far.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "batch logger worker failed");
            }
        }
    }
}

struct Worker<S> {
    sink: S,
    receiver: mpsc::Receiver<LogEntry>,
    buffer: Vec<LogEntry>,
    batch_size: usize,
    flush_interval: Duration,
}

impl<S: LogSink> Worker<S> {
    async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = new_ticker(self.flush_interval);

        tracing::debug!(
            batch_size = self.batch_size,
            flush_interval = ?self.flush_interval,
            "batch logger started"
        );

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(entry) => {
                        self.buffer.push(entry);
                        if self.buffer.len() >= self.batch_size {
                            self.flush().await;
                            ticker.reset();
                        }
                    }
                    // Every sender is gone, nothing more can arrive.
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush().await;
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }

        self.drain().await;
        tracing::debug!("batch logger stopped");
    }

    /// Takes whatever is still queued and flushes it in batch sized chunks.
    async fn drain(&mut self) {
        self.receiver.close();
        while let Some(entry) = self.receiver.recv().await {
            self.buffer.push(entry);
            if self.buffer.len() >= self.batch_size {
                self.flush().await;
            }
        }

        if !self.buffer.is_empty() {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        tracing::trace!(entries = batch.len(), "flushing log batch");

        for entry in &batch {
            if let Err(err) = self.sink.send(entry).await {
                tracing::error!(error = ?err, level = %entry.level, "failed to ship log entry");
            }
        }

        if let Err(err) = self.sink.flush().await {
            tracing::error!(error = ?err, "failed to flush log sink");
        }
    }
}

fn new_ticker(period: Duration) -> Interval {
    // NOTE: a zero period panics in tokio, and the first tick must not fire immediately.
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
