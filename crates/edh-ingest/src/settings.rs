//! Engine runtime settings
//!
//! What the job *does* lives in the control tables. This module only covers
//! where the engine connects: AWS region, optional endpoint overrides and
//! static keys for LocalStack/MinIO, and the Glue catalog id.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

/// Default AWS region when none is configured.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    pub aws_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_path_style: bool,
    pub dynamodb_endpoint: Option<String>,
    pub glue_catalog_id: Option<String>,
    /// `EDH_ACCESS_KEY_ID` / `EDH_SECRET_ACCESS_KEY`. Unset means the default
    /// credential chain.
    #[serde(skip_serializing)]
    pub static_credentials: Option<(String, String)>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            aws_region: DEFAULT_AWS_REGION.to_string(),
            s3_endpoint: None,
            s3_path_style: false,
            dynamodb_endpoint: None,
            glue_catalog_id: None,
            static_credentials: None,
        }
    }
}

impl EngineSettings {
    /// Load settings from the environment (and a `.env` file when present).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            aws_region: env::var("AWS_REGION")
                .or_else(|_| env::var("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|_| DEFAULT_AWS_REGION.to_string()),
            s3_endpoint: non_empty_var("EDH_S3_ENDPOINT"),
            s3_path_style: env::var("EDH_S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            dynamodb_endpoint: non_empty_var("EDH_DYNAMODB_ENDPOINT"),
            glue_catalog_id: non_empty_var("EDH_GLUE_CATALOG_ID"),
            static_credentials: non_empty_var("EDH_ACCESS_KEY_ID")
                .zip(non_empty_var("EDH_SECRET_ACCESS_KEY")),
        }
    }

    /// Shared SDK configuration for S3, DynamoDB and Glue.
    pub async fn sdk_config(&self) -> SdkConfig {
        debug!(region = %self.aws_region, "Loading AWS configuration");
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(self.aws_region.clone()));

        if let Some((access_key, secret_key)) = &self.static_credentials {
            debug!("Using static credentials");
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "edh-static",
            ));
        }

        loader.load().await
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Physical names of the three control tables, supplied per invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlTableNames {
    pub global_variables: String,
    pub jobs: String,
    pub steps: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.aws_region, "us-east-1");
        assert!(settings.s3_endpoint.is_none());
        assert!(!settings.s3_path_style);
        assert!(settings.static_credentials.is_none());
    }

    #[tokio::test]
    async fn test_static_credentials_reach_sdk_config() {
        let settings = EngineSettings {
            aws_region: "eu-west-1".to_string(),
            static_credentials: Some(("AKIDLOCAL".to_string(), "secret".to_string())),
            ..EngineSettings::default()
        };

        let sdk = settings.sdk_config().await;
        assert_eq!(sdk.region().map(|r| r.to_string()), Some("eu-west-1".to_string()));
        assert!(sdk.credentials_provider().is_some());
    }
}
