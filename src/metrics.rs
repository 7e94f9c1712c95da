use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use aws_sdk_cloudwatch as cloudwatch;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use aws_smithy_types::DateTime;
use eyre::Context;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type Dimensions = BTreeMap<String, String>;

#[async_trait]
pub trait MetricsClient: Send + Sync {
    async fn put_metric(
        &self,
        name: &str,
        value: f64,
        unit: &str,
        dimensions: &Dimensions,
    ) -> eyre::Result<()>;
}

pub struct CloudWatchMetrics {
    client: cloudwatch::Client,
    namespace: String,
}

impl CloudWatchMetrics {
    pub fn new(client: cloudwatch::Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl MetricsClient for CloudWatchMetrics {
    async fn put_metric(
        &self,
        name: &str,
        value: f64,
        unit: &str,
        dimensions: &Dimensions,
    ) -> eyre::Result<()> {
        let datum = MetricDatum::builder()
            .metric_name(name)
            .value(value)
            .unit(StandardUnit::from(unit))
            .set_dimensions(Some(
                dimensions
                    .iter()
                    .map(|(k, v)| Dimension::builder().name(k).value(v).build())
                    .collect(),
            ))
            .timestamp(DateTime::from_millis(chrono::Utc::now().timestamp_millis()))
            .build();

        let result = self
            .client
            .put_metric_data()
            .namespace(&self.namespace)
            .metric_data(datum)
            .send()
            .await;

        if let Err(err) = result {
            tracing::error!(
                metric = name,
                value,
                unit,
                ?dimensions,
                error = %DisplayErrorContext(&err),
                "failed to put metric to CloudWatch"
            );
            return Err(eyre::eyre!("{}", DisplayErrorContext(&err)))
                .wrap_err("Failed putting metric data");
        }

        tracing::debug!(metric = name, value, unit, ?dimensions, "sent metric to CloudWatch");
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopMetrics {}

#[async_trait]
impl MetricsClient for NoopMetrics {
    async fn put_metric(&self, _: &str, _: f64, _: &str, _: &Dimensions) -> eyre::Result<()> {
        Ok(())
    }
}

/// Measurements waiting for the emitter. A full queue drops new ones.
const QUEUE_CAPACITY: usize = 1024;

struct Measurement {
    name: String,
    value: f64,
    dimensions: Dimensions,
}

/// Handle passed to every component that records measurements.
///
/// Measurements go through a bounded queue to a single emitter task, so a slow
/// backend never holds up a request and never piles up tasks.
#[derive(Clone, Default)]
pub struct Metrics {
    emitter: Option<Arc<Emitter>>,
}

struct Emitter {
    sender: mpsc::Sender<Measurement>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Metrics {
    /// Spawns the emitter task on the current tokio runtime.
    pub fn spawn(client: impl MetricsClient + 'static) -> Self {
        Self::with_capacity(client, QUEUE_CAPACITY)
    }

    fn with_capacity(client: impl MetricsClient + 'static, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(emit(Arc::new(client), receiver, shutdown.clone()));

        Self {
            emitter: Some(Arc::new(Emitter {
                sender,
                shutdown,
                worker: Mutex::new(Some(handle)),
            })),
        }
    }

    /// A handle that records nothing and needs no runtime.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Starts a timer reported as `<operation>_time` with `layer` and
    /// `operation` dimensions.
    pub fn timer(&self, layer: &str, operation: &str) -> Timer {
        let mut dimensions = Dimensions::new();
        dimensions.insert("layer".into(), layer.into());
        dimensions.insert("operation".into(), operation.into());

        Timer {
            sender: self.emitter.as_ref().map(|e| e.sender.clone()),
            name: format!("{operation}_time"),
            dimensions,
            started: Instant::now(),
        }
    }

    /// Sends everything already queued, then stops the emitter.
    pub async fn close(&self) {
        let Some(emitter) = &self.emitter else {
            return;
        };
        emitter.shutdown.cancel();

        let handle = match emitter.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "metrics emitter failed");
            }
        }
    }
}

async fn emit(
    client: Arc<dyn MetricsClient>,
    mut receiver: mpsc::Receiver<Measurement>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(measurement) => put(&*client, measurement).await,
                None => break,
            },
            () = shutdown.cancelled() => break,
        }
    }

    receiver.close();
    while let Some(measurement) = receiver.recv().await {
        put(&*client, measurement).await;
    }
    tracing::debug!("metrics emitter stopped");
}

async fn put(client: &dyn MetricsClient, measurement: Measurement) {
    let result = client
        .put_metric(
            &measurement.name,
            measurement.value,
            "Milliseconds",
            &measurement.dimensions,
        )
        .await;

    if let Err(err) = result {
        tracing::error!(metric = %measurement.name, error = ?err, "failed to send timed metric");
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("enabled", &self.emitter.is_some())
            .finish()
    }
}

/// Queues the elapsed milliseconds when dropped.
#[must_use = "the timer reports when it goes out of scope"]
pub struct Timer {
    sender: Option<mpsc::Sender<Measurement>>,
    name: String,
    dimensions: Dimensions,
    started: Instant,
}

impl Drop for Timer {
    fn drop(&mut self) {
        let Some(sender) = &self.sender else {
            return;
        };

        let measurement = Measurement {
            name: std::mem::take(&mut self.name),
            value: self.started.elapsed().as_millis() as f64,
            dimensions: std::mem::take(&mut self.dimensions),
        };

        match sender.try_send(measurement) {
            Ok(()) => {}
            Err(TrySendError::Full(m)) => {
                tracing::warn!(metric = %m.name, "metrics queue is full, dropping measurement")
            }
            Err(TrySendError::Closed(m)) => {
                tracing::debug!(metric = %m.name, "metrics emitter is closed, dropping measurement")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingMetrics {
        recorded: Arc<Mutex<Vec<(String, String, Dimensions)>>>,
    }

    #[async_trait]
    impl MetricsClient for RecordingMetrics {
        async fn put_metric(
            &self,
            name: &str,
            _value: f64,
            unit: &str,
            dimensions: &Dimensions,
        ) -> eyre::Result<()> {
            self.recorded
                .lock()
                .unwrap()
                .push((name.to_string(), unit.to_string(), dimensions.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn timer_reports_on_drop() {
        let recorder = RecordingMetrics::default();
        let metrics = Metrics::spawn(recorder.clone());

        {
            let _timer = metrics.timer("api", "get_grades_id");
        }
        metrics.close().await;

        let recorded = recorder.recorded.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        let (name, unit, dimensions) = &recorded[0];
        assert_eq!(name, "get_grades_id_time");
        assert_eq!(unit, "Milliseconds");
        assert_eq!(dimensions["layer"], "api");
        assert_eq!(dimensions["operation"], "get_grades_id");
    }

    #[tokio::test]
    async fn timer_after_close_is_dropped() {
        let recorder = RecordingMetrics::default();
        let metrics = Metrics::spawn(recorder.clone());

        metrics.close().await;
        drop(metrics.timer("db", "get_grades"));
        metrics.close().await;

        assert!(recorder.recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn noop_needs_no_runtime() {
        let metrics = Metrics::noop();
        drop(metrics.timer("db", "get_grades"));
    }

    /// Blocks inside `put_metric` until the gate hands out a permit.
    #[derive(Clone)]
    struct GatedMetrics {
        gate: Arc<Semaphore>,
        sent: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl MetricsClient for GatedMetrics {
        async fn put_metric(&self, _: &str, _: f64, _: &str, _: &Dimensions) -> eyre::Result<()> {
            self.gate.acquire().await?.forget();
            *self.sent.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_bounds_pending_measurements() {
        let gate = Arc::new(Semaphore::new(0));
        let client = GatedMetrics {
            gate: gate.clone(),
            sent: Arc::default(),
        };
        let metrics = Metrics::with_capacity(client.clone(), 2);

        // The emitter takes the first one and blocks. Two more fit the queue.
        drop(metrics.timer("api", "first"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..10 {
            drop(metrics.timer("api", "burst"));
        }

        gate.add_permits(100);
        metrics.close().await;

        assert_eq!(*client.sent.lock().unwrap(), 3);
    }
}
