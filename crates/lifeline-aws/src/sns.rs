use async_trait::async_trait;
use aws_sdk_sns::Client;
use aws_sdk_sns::error::DisplayErrorContext;
use lifeline_queue::{QueueError, QueueResult, TopicBackend};

/// SNS topic subscriptions for instance queues.
pub struct SnsTopic {
    client: Client,
}

impl SnsTopic {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl TopicBackend for SnsTopic {
    async fn subscribe_queue(&self, topic_arn: &str, queue_arn: &str) -> QueueResult<String> {
        let out = self
            .client
            .subscribe()
            .topic_arn(topic_arn)
            .protocol("sqs")
            .endpoint(queue_arn)
            .return_subscription_arn(true)
            .send()
            .await
            .map_err(|e| QueueError::Subscription(DisplayErrorContext(&e).to_string()))?;
        out.subscription_arn()
            .map(String::from)
            .ok_or_else(|| QueueError::Subscription(format!("no subscription arn for {queue_arn}")))
    }

    async fn unsubscribe(&self, subscription: &str) -> QueueResult<()> {
        self.client
            .unsubscribe()
            .subscription_arn(subscription)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Subscription(DisplayErrorContext(&e).to_string()))
    }
}
