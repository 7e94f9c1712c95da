use std::io::Write;

use async_trait::async_trait;
use aws_sdk_cloudwatchlogs as cloudwatchlogs;
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, SdkError};
use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsOutput;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use eyre::Context;

use super::{LogEntry, LogFormatter, LogSink};

/// Ships entries to a CloudWatch Logs stream, one `PutLogEvents` call per entry.
///
/// The sink tracks the stream's sequence token itself. When the backend rejects
/// a stale token the current one is fetched with `DescribeLogStreams` and the
/// call is retried once.
pub struct CloudWatchSink {
    client: cloudwatchlogs::Client,
    group_name: String,
    stream_name: String,
    sequence_token: Option<String>,
    formatter: Box<dyn LogFormatter>,
}

impl CloudWatchSink {
    /// Builds the sink and makes sure the log group and stream exist.
    pub async fn new(
        client: cloudwatchlogs::Client,
        group_name: impl Into<String>,
        stream_name: impl Into<String>,
        formatter: Box<dyn LogFormatter>,
    ) -> eyre::Result<Self> {
        let sink = Self {
            client,
            group_name: group_name.into(),
            stream_name: stream_name.into(),
            sequence_token: None,
            formatter,
        };

        sink.ensure_stream().await?;
        Ok(sink)
    }

    async fn ensure_stream(&self) -> eyre::Result<()> {
        let result = self
            .client
            .create_log_group()
            .log_group_name(&self.group_name)
            .send()
            .await;

        match result {
            Ok(_) => tracing::info!(group = %self.group_name, "created log group"),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_already_exists_exception()) => {}
            Err(err) => {
                return Err(eyre::eyre!("{}", DisplayErrorContext(&err)))
                    .wrap_err(format!("Failed creating log group {}", self.group_name));
            }
        }

        let result = self
            .client
            .create_log_stream()
            .log_group_name(&self.group_name)
            .log_stream_name(&self.stream_name)
            .send()
            .await;

        match result {
            Ok(_) => tracing::info!(stream = %self.stream_name, "created log stream"),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_already_exists_exception()) => {}
            Err(err) => {
                return Err(eyre::eyre!("{}", DisplayErrorContext(&err)))
                    .wrap_err(format!("Failed creating log stream {}", self.stream_name));
            }
        }

        Ok(())
    }

    #[allow(deprecated)]
    async fn put_event(
        &self,
        event: InputLogEvent,
    ) -> Result<
        PutLogEventsOutput,
        SdkError<cloudwatchlogs::operation::put_log_events::PutLogEventsError>,
    > {
        self.client
            .put_log_events()
            .log_group_name(&self.group_name)
            .log_stream_name(&self.stream_name)
            .log_events(event)
            .set_sequence_token(self.sequence_token.clone())
            .send()
            .await
    }

    #[allow(deprecated)]
    async fn refresh_sequence_token(&mut self) -> eyre::Result<()> {
        let response = self
            .client
            .describe_log_streams()
            .log_group_name(&self.group_name)
            .log_stream_name_prefix(&self.stream_name)
            .send()
            .await
            .map_err(|err| eyre::eyre!("{}", DisplayErrorContext(&err)))
            .wrap_err("Failed describing log streams")?;

        // NOTE: the prefix filter can match sibling streams, only take the exact name.
        self.sequence_token = response
            .log_streams()
            .iter()
            .find(|s| s.log_stream_name() == Some(self.stream_name.as_str()))
            .and_then(|stream| stream.upload_sequence_token())
            .map(|token| token.to_string());

        Ok(())
    }
}

#[async_trait]
#[allow(deprecated)]
impl LogSink for CloudWatchSink {
    async fn send(&mut self, entry: &LogEntry) -> eyre::Result<()> {
        let event = InputLogEvent::builder()
            .message(self.formatter.format(entry))
            .timestamp(entry.timestamp.timestamp_millis())
            .build()
            .wrap_err("Failed building log event")?;

        let response = match self.put_event(event.clone()).await {
            Ok(response) => response,
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_invalid_sequence_token_exception()) =>
            {
                tracing::debug!(stream = %self.stream_name, "sequence token rejected, refreshing");
                self.refresh_sequence_token().await?;

                if self.sequence_token.is_none() {
                    return Err(eyre::eyre!("{}", DisplayErrorContext(&err)))
                        .wrap_err("Failed putting log events, no sequence token available");
                }

                self.put_event(event)
                    .await
                    .map_err(|err| eyre::eyre!("{}", DisplayErrorContext(&err)))
                    .wrap_err("Failed putting log events after token refresh")?
            }
            Err(err) => {
                return Err(eyre::eyre!("{}", DisplayErrorContext(&err)))
                    .wrap_err("Failed putting log events");
            }
        };

        if let Some(token) = response.next_sequence_token() {
            self.sequence_token = Some(token.to_string());
        }

        Ok(())
    }
}

pub struct StderrSink {
    handle: std::io::Stderr,
    formatter: Box<dyn LogFormatter>,
}

impl StderrSink {
    pub fn new(formatter: Box<dyn LogFormatter>) -> Self {
        Self {
            handle: std::io::stderr(),
            formatter,
        }
    }
}

#[async_trait]
impl LogSink for StderrSink {
    async fn send(&mut self, entry: &LogEntry) -> eyre::Result<()> {
        let mut writer = self.handle.lock();
        writeln!(writer, "{}", self.formatter.format(entry))?;
        Ok(())
    }

    async fn flush(&mut self) -> eyre::Result<()> {
        self.handle.lock().flush().context("Can't flush stderr")
    }
}

#[derive(Default)]
pub struct NullSink {}

impl NullSink {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl LogSink for NullSink {
    async fn send(&mut self, _entry: &LogEntry) -> eyre::Result<()> {
        Ok(())
    }
}
