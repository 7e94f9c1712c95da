use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use eyre::Context;
use serde::{Deserialize, Serialize};

use crate::{
    logging::MAX_BATCH_SIZE,
    utils::{human_duration, parse_duration},
};

pub const DEFAULT_CONFIG_PATH: &str = "config/conf.yaml";
const ENV_PREFIX: &str = "GRADES";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub aws: AwsConfig,
    pub logs: LogsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://grades.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            profile: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Cloudwatch,
    Stderr,
    None,
}

impl FromStr for SinkKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloudwatch" => Ok(SinkKind::Cloudwatch),
            "stderr" => Ok(SinkKind::Stderr),
            "none" => Ok(SinkKind::None),
            other => Err(eyre::eyre!(
                "Unknown log sink '{}', expected cloudwatch, stderr or none",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub sink: SinkKind,
    pub group: String,
    pub stream: String,
    pub batch_size: usize,
    #[serde(with = "human_duration")]
    pub flush_interval: Duration,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Cloudwatch,
            group: "/grades-service".to_string(),
            stream: "application".to_string(),
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "GradesService".to_string(),
        }
    }
}

impl Configuration {
    pub fn from_yaml(contents: &str) -> eyre::Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).context("Failed parsing configuration")
    }

    /// Applies `GRADES_<SECTION>_<KEY>` overrides, falling back to the plain
    /// AWS variables for the AWS related keys.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> eyre::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |section: &str, key: &str, aws_fallback: Option<&str>| {
            lookup(&format!("{}_{}_{}", ENV_PREFIX, section, key))
                .or_else(|| aws_fallback.and_then(&lookup))
        };

        if let Some(port) = var("SERVER", "PORT", None) {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid server port {}", port))?;
        }

        if let Some(url) = var("DATABASE", "URL", None) {
            self.database.url = url;
        }

        if let Some(region) = var("AWS", "REGION", Some("AWS_REGION")) {
            self.aws.region = region;
        }
        if let Some(endpoint) = var("AWS", "ENDPOINT", Some("AWS_ENDPOINT")) {
            self.aws.endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }
        if let Some(profile) = var("AWS", "PROFILE", None) {
            self.aws.profile = Some(profile).filter(|p| !p.is_empty());
        }

        if let Some(sink) = var("LOGS", "SINK", None) {
            self.logs.sink = sink.parse()?;
        }
        if let Some(group) = var("LOGS", "GROUP", Some("AWS_LOG_GROUP")) {
            self.logs.group = group;
        }
        if let Some(stream) = var("LOGS", "STREAM", Some("AWS_LOG_STREAM")) {
            self.logs.stream = stream;
        }
        if let Some(size) = var("LOGS", "BATCH_SIZE", None) {
            self.logs.batch_size = size
                .parse()
                .with_context(|| format!("Invalid log batch size {}", size))?;
        }
        if let Some(interval) = var("LOGS", "FLUSH_INTERVAL", None) {
            self.logs.flush_interval = parse_duration(&interval)
                .with_context(|| format!("Invalid log flush interval {}", interval))?;
        }

        if let Some(enabled) = var("METRICS", "ENABLED", None) {
            self.metrics.enabled = enabled
                .parse()
                .with_context(|| format!("Invalid metrics enabled flag {}", enabled))?;
        }
        if let Some(namespace) = var("METRICS", "NAMESPACE", Some("AWS_METRICS_NAMESPACE")) {
            self.metrics.namespace = namespace;
        }

        Ok(())
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.server.port == 0 {
            return Err(eyre::eyre!("Server port cannot be 0"));
        }
        if self.database.url.trim().is_empty() {
            return Err(eyre::eyre!("Database url cannot be empty"));
        }
        if self.logs.batch_size == 0 {
            return Err(eyre::eyre!("Log batch size must be at least 1"));
        }
        if self.logs.batch_size > MAX_BATCH_SIZE {
            return Err(eyre::eyre!(
                "Log batch size cannot exceed {}, got {}",
                MAX_BATCH_SIZE,
                self.logs.batch_size
            ));
        }
        if self.logs.flush_interval.is_zero() {
            return Err(eyre::eyre!("Log flush interval must be greater than 0"));
        }
        if self.logs.sink == SinkKind::Cloudwatch {
            if self.logs.group.trim().is_empty() {
                return Err(eyre::eyre!("Log group cannot be empty"));
            }
            if self.logs.stream.trim().is_empty() {
                return Err(eyre::eyre!("Log stream cannot be empty"));
            }
        }
        if self.metrics.enabled && self.metrics.namespace.trim().is_empty() {
            return Err(eyre::eyre!("Metrics namespace cannot be empty"));
        }
        Ok(())
    }
}

pub trait ConfigManager: Sized + Clone + Send + Sync {
    fn config_path(&self) -> &Path;
    fn load(&self) -> eyre::Result<Configuration>;
}

/// Reads the YAML file, then applies environment overrides.
#[derive(Clone, Debug)]
pub struct FileConfigManager {
    path: PathBuf,
    required: bool,
}

impl FileConfigManager {
    /// A missing file is only an error when the path was given explicitly.
    pub fn new(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self {
                path,
                required: true,
            },
            None => Self {
                path: PathBuf::from(DEFAULT_CONFIG_PATH),
                required: false,
            },
        }
    }
}

impl ConfigManager for FileConfigManager {
    fn config_path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> eyre::Result<Configuration> {
        let mut config = if self.path.exists() {
            let contents = std::fs::read_to_string(&self.path).with_context(|| {
                format!("Failed reading config file {}", self.path.display())
            })?;
            Configuration::from_yaml(&contents)
                .with_context(|| format!("Invalid config file {}", self.path.display()))?
        } else if self.required {
            return Err(eyre::eyre!(
                "Config file {} does not exist",
                self.path.display()
            ));
        } else {
            tracing::debug!(path = %self.path.display(), "no config file found, using defaults");
            Configuration::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;

        Ok(config)
    }
}
