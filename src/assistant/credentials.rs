//! AWS credentials for the speech service.
//!
//! On ECS the task role's short-lived credentials are served from the
//! container metadata endpoint; they're fetched fresh before each session.
//! When that isn't available, the static `AWS_*` environment variables are
//! used, and failing that the SDK's default provider chain.

use super::AssistantError;
use crate::config::CredentialsConfig;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

pub const RELATIVE_URI_VAR: &str = "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI";

/// Explicit credentials handed to the SDK.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Body returned by the container metadata endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
}

impl From<ContainerCredentials> for StaticCredentials {
    fn from(creds: ContainerCredentials) -> Self {
        Self {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.token,
        }
    }
}

/// Fetch task-role credentials from `{endpoint}{relative_uri}`. No retries.
pub async fn fetch_container_credentials(
    config: &CredentialsConfig,
    relative_uri: &str,
) -> Result<StaticCredentials, AssistantError> {
    let url = format!("{}{}", config.metadata_endpoint.trim_end_matches('/'), relative_uri);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| AssistantError::Credentials(e.to_string()))?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| AssistantError::Credentials(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AssistantError::Credentials(format!(
            "metadata endpoint returned {}",
            status
        )));
    }

    let creds: ContainerCredentials = response
        .json()
        .await
        .map_err(|e| AssistantError::Credentials(e.to_string()))?;
    Ok(creds.into())
}

/// Static credentials from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` /
/// `AWS_SESSION_TOKEN`, read through `lookup`.
pub fn from_env_with<F>(lookup: F) -> Option<StaticCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    let access_key_id = lookup("AWS_ACCESS_KEY_ID").filter(|v| !v.is_empty())?;
    let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY").filter(|v| !v.is_empty())?;
    Some(StaticCredentials {
        access_key_id,
        secret_access_key,
        session_token: lookup("AWS_SESSION_TOKEN").filter(|v| !v.is_empty()),
    })
}

/// Credentials for the next session.
///
/// A failed refresh is logged and never fatal. `None` means "use the SDK
/// default chain".
pub async fn resolve(config: &CredentialsConfig) -> Option<StaticCredentials> {
    resolve_with(config, |key| env::var(key).ok()).await
}

pub async fn resolve_with<F>(config: &CredentialsConfig, lookup: F) -> Option<StaticCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(uri) = lookup(RELATIVE_URI_VAR).filter(|v| !v.is_empty()) {
        info!("Fetching fresh AWS credentials for Bedrock client");
        match fetch_container_credentials(config, &uri).await {
            Ok(creds) => {
                info!("AWS credentials refreshed successfully");
                return Some(creds);
            }
            Err(e) => warn!("Error refreshing credentials: {}", e),
        }
    }

    from_env_with(lookup)
}
