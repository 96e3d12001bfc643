//! Queue and topic backend traits.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// Attributes applied when the queue is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAttributes {
    pub visibility_timeout: Duration,
    /// Long-poll wait for receives.
    pub wait_time: Duration,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(3600),
            wait_time: Duration::from_secs(20),
        }
    }
}

/// A message as read off the queue, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Handle used to delete the message.
    pub receipt: String,
    pub body: String,
}

/// Point-to-point queue operations, keyed by queue name.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create the queue. An existing queue yields `QueueError::AlreadyExists`.
    async fn create_queue(&self, name: &str, attributes: &QueueAttributes) -> QueueResult<()>;

    async fn queue_arn(&self, name: &str) -> QueueResult<String>;

    async fn set_access_policy(&self, name: &str, policy: &str) -> QueueResult<()>;

    /// Long-poll for up to `wait`. An empty batch is not an error.
    async fn receive(&self, name: &str, wait: Duration) -> QueueResult<Vec<RawMessage>>;

    async fn delete_message(&self, name: &str, receipt: &str) -> QueueResult<()>;

    async fn delete_queue(&self, name: &str) -> QueueResult<()>;
}

/// Publish/subscribe topic operations.
#[async_trait]
pub trait TopicBackend: Send + Sync {
    /// Subscribe a queue to a topic, returning the subscription handle.
    async fn subscribe_queue(&self, topic_arn: &str, queue_arn: &str) -> QueueResult<String>;

    async fn unsubscribe(&self, subscription: &str) -> QueueResult<()>;
}

/// Backend used when cloud integration is disabled.
///
/// Provisioning always succeeds and receives idle for the full wait
/// without ever returning a message.
#[derive(Debug, Clone, Default)]
pub struct NoopQueue;

#[async_trait]
impl QueueBackend for NoopQueue {
    async fn create_queue(&self, name: &str, _attributes: &QueueAttributes) -> QueueResult<()> {
        tracing::debug!(queue = name, "noop queue: create");
        Ok(())
    }

    async fn queue_arn(&self, name: &str) -> QueueResult<String> {
        Ok(format!("arn:aws:sqs:local:000000000000:{name}"))
    }

    async fn set_access_policy(&self, _name: &str, _policy: &str) -> QueueResult<()> {
        Ok(())
    }

    async fn receive(&self, _name: &str, wait: Duration) -> QueueResult<Vec<RawMessage>> {
        tokio::time::sleep(wait).await;
        Ok(Vec::new())
    }

    async fn delete_message(&self, _name: &str, _receipt: &str) -> QueueResult<()> {
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> QueueResult<()> {
        tracing::debug!(queue = name, "noop queue: delete");
        Ok(())
    }
}

#[async_trait]
impl TopicBackend for NoopQueue {
    async fn subscribe_queue(&self, _topic_arn: &str, queue_arn: &str) -> QueueResult<String> {
        Ok(format!("{queue_arn}:noop-subscription"))
    }

    async fn unsubscribe(&self, _subscription: &str) -> QueueResult<()> {
        Ok(())
    }
}
