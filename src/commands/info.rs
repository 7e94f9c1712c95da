use clap::{Args, CommandFactory};

use crate::{
    commands::GradesService,
    config::{ConfigManager, Configuration, SinkKind},
    db::{Database, DatabaseSettings, Sqlite},
    metrics::Metrics,
};

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cmd {}

impl Cmd {
    pub async fn run(&self, config: &impl ConfigManager) -> eyre::Result<()> {
        let conf = config.load()?;
        let db = Sqlite::new(&DatabaseSettings {
            url: conf.database.url.clone(),
            metrics: Metrics::noop(),
        })
        .await?;

        let version = db.version().await?;
        let engine = db.engine();

        println!(
            "Version:        {}",
            GradesService::command().get_version().unwrap_or("")
        );
        println!("Database:       {}-{}", engine, version);
        println!("Database URL:   {}", conf.database.url);
        println!("Config:         {}", config.config_path().display());
        println!("Logs:           {}", log_destination(&conf));
        Ok(())
    }
}

fn log_destination(conf: &Configuration) -> String {
    match conf.logs.sink {
        SinkKind::Cloudwatch => format!(
            "cloudwatch {}/{} ({})",
            conf.logs.group, conf.logs.stream, conf.aws.region
        ),
        SinkKind::Stderr => "stderr".to_string(),
        SinkKind::None => "disabled".to_string(),
    }
}
