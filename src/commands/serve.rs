use std::sync::Arc;

use clap::Args;
use eyre::Context;

use crate::{
    aws::AwsClientBuilder,
    config::{ConfigManager, Configuration, SinkKind},
    db::{Database, DatabaseSettings, Sqlite},
    logging::{
        BatchLogger, CloudWatchSink, JsonFormatter, LineFormatter, LogSink, NullSink, StderrSink,
    },
    metrics::{CloudWatchMetrics, Metrics},
    server::{self, AppState},
};

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cmd {
    #[arg(
        long,
        short = 'p',
        help = "Port to listen on. Overrides server.port from the configuration."
    )]
    pub port: Option<u16>,
}

impl Cmd {
    pub async fn run(&self, config: &impl ConfigManager) -> eyre::Result<()> {
        let mut conf = config.load()?;
        if let Some(port) = self.port {
            conf.server.port = port;
        }
        conf.validate()?;

        let sdk_config = if needs_aws(&conf) {
            Some(AwsClientBuilder::from_config(&conf.aws).load().await)
        } else {
            None
        };

        let metrics = match (&sdk_config, conf.metrics.enabled) {
            (Some(sdk), true) => Metrics::spawn(CloudWatchMetrics::new(
                AwsClientBuilder::metrics_client(sdk),
                &conf.metrics.namespace,
            )),
            _ => Metrics::noop(),
        };

        let db = Sqlite::new(&DatabaseSettings {
            url: conf.database.url.clone(),
            metrics: metrics.clone(),
        })
        .await
        .with_context(|| format!("Failed opening database {}", conf.database.url))?;

        let version = db.version().await?;
        tracing::debug!(engine = db.engine(), %version, "database ready");

        let sink = build_sink(&conf, sdk_config.as_ref()).await?;
        let logger = Arc::new(BatchLogger::spawn(
            sink,
            conf.logs.batch_size,
            conf.logs.flush_interval,
        ));

        let app = server::router(AppState::new(db, logger.clone(), metrics.clone()));
        let result = server::serve(app, conf.server.port).await;

        tracing::info!("flushing buffered log entries and metrics");
        logger.close().await;
        metrics.close().await;

        result
    }
}

fn needs_aws(conf: &Configuration) -> bool {
    conf.logs.sink == SinkKind::Cloudwatch || conf.metrics.enabled
}

async fn build_sink(
    conf: &Configuration,
    sdk_config: Option<&aws_config::SdkConfig>,
) -> eyre::Result<Box<dyn LogSink>> {
    let sink: Box<dyn LogSink> = match (conf.logs.sink, sdk_config) {
        (SinkKind::Cloudwatch, Some(sdk)) => {
            let sink = CloudWatchSink::new(
                AwsClientBuilder::logs_client(sdk),
                &conf.logs.group,
                &conf.logs.stream,
                Box::new(JsonFormatter::new()),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed preparing log stream {}/{}",
                    conf.logs.group, conf.logs.stream
                )
            })?;
            Box::new(sink)
        }
        (SinkKind::Cloudwatch, None) => {
            return Err(eyre::eyre!("CloudWatch sink requires an AWS configuration"))
        }
        (SinkKind::Stderr, _) => Box::new(StderrSink::new(Box::new(LineFormatter::new(false)))),
        (SinkKind::None, _) => Box::new(NullSink::new()),
    };

    tracing::info!(sink = ?conf.logs.sink, "log sink ready");
    Ok(sink)
}
