use std::{fmt::Display, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::{
    config::{ConfigManager, FileConfigManager},
    logging::subscriber::{init_tracing, LogFormat},
};

mod info;
mod serve;

#[derive(Subcommand, Debug)]
pub enum GradesCmd {
    /// Run the HTTP API until SIGINT or SIGTERM.
    Serve(serve::Cmd),

    /// Print version, database and logging details.
    Info(info::Cmd),
}

impl Display for GradesCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GradesCmd::Serve(_cmd) => write!(f, "serve"),
            GradesCmd::Info(_cmd) => write!(f, "info"),
        }
    }
}

#[derive(Parser)]
#[command(version, long_version = "")]
#[command(about = "HTTP service for student grades with CloudWatch log shipping.", long_about = None, disable_help_subcommand = true)]
pub struct GradesService {
    #[arg(
        global = true,
        long,
        short = 'c',
        help = "Path to the YAML configuration file. Defaults to config/conf.yaml when present.",
        display_order = 0
    )]
    pub config: Option<PathBuf>,

    #[arg(
        global = true,
        long,
        value_enum,
        env = "GRADES_LOG_FORMAT",
        default_value_t = LogFormat::Json,
        help = "Format of the local diagnostic output.",
        display_order = 1
    )]
    pub log_format: LogFormat,

    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        help = "Write verbose messages to stderr for debugging.",
        display_order = 999
    )]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: GradesCmd,
}

impl GradesService {
    pub fn run(self) -> eyre::Result<()> {
        init_tracing(self.verbose, self.log_format)?;

        tracing::info!("grades-service starting up");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        tracing::info!("running command {}", &self.cmd);

        let config = FileConfigManager::new(self.config.clone());
        let result = runtime.block_on(self.invoke_sub_command(config));

        if let Err(msg) = &result {
            tracing::error!(
                "failed running command {}, error={} cause={}",
                &self.cmd,
                msg,
                msg.root_cause()
            );
            tracing::debug!("{:?}", msg);
        }

        result
    }

    async fn invoke_sub_command<T>(&self, config: T) -> eyre::Result<()>
    where
        T: ConfigManager,
    {
        match &self.cmd {
            GradesCmd::Serve(serve) => serve.run(&config).await,
            GradesCmd::Info(info) => info.run(&config).await,
        }
    }
}
