//! EC2 instance metadata, read through the SDK's IMDSv2 client.

use std::time::Duration;

use aws_config::imds;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AwsError, AwsResult};

const IDENTITY_PATH: &str = "/latest/dynamic/instance-identity/document";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub region: String,
    pub account_id: String,
}

impl InstanceIdentity {
    pub fn from_document(document: &str) -> AwsResult<Self> {
        serde_json::from_str(document).map_err(|e| AwsError::Metadata {
            path: IDENTITY_PATH.to_string(),
            reason: format!("invalid identity document: {e}"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ImdsClient {
    client: imds::Client,
}

impl Default for ImdsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ImdsClient {
    /// Client for the link-local metadata endpoint, or whatever
    /// `AWS_EC2_METADATA_SERVICE_ENDPOINT` points at.
    pub fn new() -> Self {
        Self::from_client(
            imds::Client::builder()
                .connect_timeout(REQUEST_TIMEOUT)
                .read_timeout(REQUEST_TIMEOUT)
                .build(),
        )
    }

    pub fn from_client(client: imds::Client) -> Self {
        Self { client }
    }

    /// Instance id, region and account from the identity document.
    pub async fn identity(&self) -> AwsResult<InstanceIdentity> {
        let document = self.get(IDENTITY_PATH).await?;
        let identity = InstanceIdentity::from_document(&document)?;
        debug!(instance = %identity.instance_id, region = %identity.region, "read instance identity");
        Ok(identity)
    }

    pub async fn get(&self, path: &str) -> AwsResult<String> {
        self.client
            .get(path)
            .await
            .map(String::from)
            .map_err(|e| AwsError::Metadata {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}
