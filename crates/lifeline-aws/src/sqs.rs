//! SQS-backed instance queue.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::QueueAttributeName;
use lifeline_queue::{QueueAttributes, QueueBackend, QueueError, QueueResult, RawMessage};
use tracing::debug;

use crate::error::{is_queue_exists_code, is_queue_missing_code};

const MAX_MESSAGES: i32 = 10;

/// Map an SQS failure onto the queue error taxonomy.
fn classify<E>(queue: &str, err: SdkError<E>) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if is_queue_missing_code(err.code()) {
        return QueueError::QueueMissing(queue.to_string());
    }
    if is_queue_exists_code(err.code()) {
        return QueueError::AlreadyExists(queue.to_string());
    }
    QueueError::Transport(DisplayErrorContext(&err).to_string())
}

fn secs(d: Duration) -> String {
    d.as_secs().to_string()
}

pub struct SqsQueue {
    client: Client,
    /// queue name -> queue url
    urls: Mutex<HashMap<String, String>>,
}

impl SqsQueue {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
            urls: Mutex::new(HashMap::new()),
        }
    }

    fn cached_url(&self, name: &str) -> Option<String> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn remember(&self, name: &str, url: &str) {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), url.to_string());
    }

    fn forget(&self, name: &str) {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    async fn url(&self, name: &str) -> QueueResult<String> {
        if let Some(url) = self.cached_url(name) {
            return Ok(url);
        }
        let out = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| classify(name, e))?;
        let url = out
            .queue_url()
            .ok_or_else(|| QueueError::Transport(format!("no url returned for queue {name}")))?;
        self.remember(name, url);
        Ok(url.to_string())
    }

    /// Drop the cached url when the queue turns out to be gone.
    fn seen<T>(&self, name: &str, result: QueueResult<T>) -> QueueResult<T> {
        if let Err(e) = &result {
            if e.is_queue_missing() {
                self.forget(name);
            }
        }
        result
    }
}

#[async_trait]
impl QueueBackend for SqsQueue {
    async fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> QueueResult<()> {
        let out = self
            .client
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                secs(attributes.visibility_timeout),
            )
            .attributes(
                QueueAttributeName::ReceiveMessageWaitTimeSeconds,
                secs(attributes.wait_time),
            )
            .send()
            .await
            .map_err(|e| classify(name, e))?;
        if let Some(url) = out.queue_url() {
            debug!(queue = name, url, "queue created");
            self.remember(name, url);
        }
        Ok(())
    }

    async fn queue_arn(&self, name: &str) -> QueueResult<String> {
        let url = self.url(name).await?;
        let result = self
            .client
            .get_queue_attributes()
            .queue_url(&url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| classify(name, e));
        let out = self.seen(name, result)?;
        out.attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .cloned()
            .ok_or_else(|| QueueError::Transport(format!("no arn returned for queue {name}")))
    }

    async fn set_access_policy(&self, name: &str, policy: &str) -> QueueResult<()> {
        let url = self.url(name).await?;
        let result = self
            .client
            .set_queue_attributes()
            .queue_url(&url)
            .attributes(QueueAttributeName::Policy, policy)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(name, e));
        self.seen(name, result)
    }

    async fn receive(&self, name: &str, wait: Duration) -> QueueResult<Vec<RawMessage>> {
        let url = self.seen(name, self.url(name).await)?;
        let wait_secs = i32::try_from(wait.as_secs()).unwrap_or(20).min(20);
        let result = self
            .client
            .receive_message()
            .queue_url(&url)
            .wait_time_seconds(wait_secs)
            .max_number_of_messages(MAX_MESSAGES)
            .send()
            .await
            .map_err(|e| classify(name, e));
        let out = self.seen(name, result)?;

        Ok(out
            .messages()
            .iter()
            .filter_map(|m| {
                Some(RawMessage {
                    receipt: m.receipt_handle()?.to_string(),
                    body: m.body().unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

    async fn delete_message(&self, name: &str, receipt: &str) -> QueueResult<()> {
        let url = self.url(name).await?;
        let result = self
            .client
            .delete_message()
            .queue_url(&url)
            .receipt_handle(receipt)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(name, e));
        self.seen(name, result)
    }

    async fn delete_queue(&self, name: &str) -> QueueResult<()> {
        let url = self.url(name).await?;
        let result = self
            .client
            .delete_queue()
            .queue_url(&url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(name, e));
        self.forget(name);
        result
    }
}
