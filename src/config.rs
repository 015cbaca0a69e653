//! Storage provider settings collected from the environment.

use crate::error::SyncError;
use std::env;

/// Credentials and endpoint for an S3-compatible provider.
#[derive(Clone)]
pub struct StoreConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Region name; `us-east-1` when unset.
    pub region: String,
    /// Custom endpoint for R2, MinIO and similar providers.
    pub endpoint: Option<String>,
    /// Path-style addressing; defaults to true when an endpoint is set.
    pub force_path_style: Option<bool>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Values supplied on the command line; each one wins over its environment variable.
#[derive(Debug, Clone, Default)]
pub struct StoreOverrides {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: Option<bool>,
}

const DEFAULT_REGION: &str = "us-east-1";

impl StoreConfig {
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_DEFAULT_REGION`,
    /// `S3_ENDPOINT_URL` and `S3_FORCE_PATH_STYLE`, then applies `overrides`.
    pub fn from_env(overrides: StoreOverrides) -> Result<Self, SyncError> {
        Self::resolve(overrides, |name| env::var(name).ok())
    }

    fn resolve(
        overrides: StoreOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SyncError> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let access_key_id = non_empty(overrides.access_key_id)
            .or_else(|| non_empty(lookup("AWS_ACCESS_KEY_ID")))
            .ok_or_else(|| SyncError::Configuration("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_access_key = non_empty(overrides.secret_access_key)
            .or_else(|| non_empty(lookup("AWS_SECRET_ACCESS_KEY")))
            .ok_or_else(|| SyncError::Configuration("AWS_SECRET_ACCESS_KEY is not set".into()))?;
        let region = non_empty(overrides.region)
            .or_else(|| non_empty(lookup("AWS_DEFAULT_REGION")))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = non_empty(overrides.endpoint).or_else(|| non_empty(lookup("S3_ENDPOINT_URL")));

        let force_path_style = match overrides.force_path_style {
            Some(value) => Some(value),
            None => match non_empty(lookup("S3_FORCE_PATH_STYLE")) {
                Some(raw) => Some(parse_bool(&raw).ok_or_else(|| {
                    SyncError::Configuration(format!(
                        "S3_FORCE_PATH_STYLE must be true or false, got `{}`",
                        raw
                    ))
                })?),
                None => None,
            },
        };

        Ok(Self {
            access_key_id,
            secret_access_key,
            region,
            endpoint,
            force_path_style,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
