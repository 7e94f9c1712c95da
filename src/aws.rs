use aws_config::{retry::RetryConfig, Region, SdkConfig};
use aws_sdk_cloudwatch as cloudwatch;
use aws_sdk_cloudwatchlogs as cloudwatchlogs;

use crate::config::AwsConfig;

pub struct AwsClientBuilder {
    profile_name: Option<String>,
    region: Option<String>,
    endpoint_url: Option<String>,
    retry_config: RetryConfig,
}

impl AwsClientBuilder {
    pub fn new() -> Self {
        AwsClientBuilder {
            profile_name: None,
            region: None,
            endpoint_url: None,
            retry_config: RetryConfig::standard(),
        }
    }

    pub fn from_config(config: &AwsConfig) -> Self {
        Self::new()
            .use_profile_name(config.profile.clone())
            .use_region(Some(config.region.clone()))
            .use_endpoint_url(config.endpoint.clone())
    }

    pub fn use_profile_name(mut self, profile_name: Option<String>) -> Self {
        self.profile_name = profile_name;
        self
    }

    pub fn use_region(mut self, region: Option<String>) -> Self {
        self.region = region.filter(|r| !r.is_empty());
        self
    }

    /// Points every client at a custom endpoint, e.g. a local emulator.
    pub fn use_endpoint_url(mut self, endpoint_url: Option<String>) -> Self {
        self.endpoint_url = endpoint_url;
        self
    }

    pub async fn load(&self) -> SdkConfig {
        let mut builder = aws_config::from_env().retry_config(self.retry_config.clone());
        if let Some(profile_name) = &self.profile_name {
            builder = builder.profile_name(profile_name);
        }

        if let Some(region) = &self.region {
            builder = builder.region(Region::new(region.clone()));
        }

        if let Some(endpoint_url) = &self.endpoint_url {
            tracing::info!(endpoint = %endpoint_url, "using custom AWS endpoint");
            builder = builder.endpoint_url(endpoint_url);
        }

        builder.load().await
    }

    pub fn logs_client(config: &SdkConfig) -> cloudwatchlogs::Client {
        cloudwatchlogs::Client::new(config)
    }

    pub fn metrics_client(config: &SdkConfig) -> cloudwatch::Client {
        cloudwatch::Client::new(config)
    }
}

impl Default for AwsClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
