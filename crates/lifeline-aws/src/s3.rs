use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use lifeline_agent::{AgentError, AgentResult, LogUploader, remote_keys};
use tracing::debug;

/// Uploads log directories file by file into one bucket.
pub struct S3LogUploader {
    client: Client,
    bucket: String,
}

impl S3LogUploader {
    pub fn new(config: &aws_config::SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: Client::new(config),
            bucket: bucket.into(),
        }
    }

    /// Use a different region than the rest of the agent.
    pub fn in_region(config: &aws_config::SdkConfig, region: &str, bucket: impl Into<String>) -> Self {
        let conf = aws_sdk_s3::config::Builder::from(config)
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .build();
        Self {
            client: Client::from_conf(conf),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl LogUploader for S3LogUploader {
    async fn upload(&self, local: &Path, remote: &str) -> AgentResult<()> {
        for (file, key) in remote_keys(local, remote) {
            let content = tokio::fs::read(&file)
                .await
                .map_err(|e| AgentError::Upload(format!("read {}: {e}", file.display())))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(ByteStream::from(content))
                .send()
                .await
                .map_err(|e| AgentError::Upload(DisplayErrorContext(&e).to_string()))?;
            debug!(bucket = %self.bucket, key = %key, "uploaded log file");
        }
        Ok(())
    }
}
