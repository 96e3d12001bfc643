//! Channel manager. Provisions the instance queue and its topic
//! subscription, and tears both down exactly once.

use std::sync::Arc;
use std::time::Duration;

use lifeline_core::ArnScope;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::backend::{QueueAttributes, QueueBackend, TopicBackend};
use crate::error::{QueueError, QueueResult};
use crate::policy::access_policy;

/// A live queue-to-topic subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub queue: String,
    pub queue_arn: String,
    pub topic_arn: String,
    /// Handle needed to unsubscribe.
    pub handle: String,
}

#[derive(Debug, Default)]
struct ChannelState {
    subscription: Option<Subscription>,
    released: bool,
}

/// Owns the instance's channel.
///
/// Each provisioning attempt and the release serialize on one lock. The
/// lock is not held between attempts, so a release issued while
/// [`acquire`](Self::acquire) is retrying completes right away and the
/// pending acquire returns `Released`.
pub struct ChannelManager {
    queue: Arc<dyn QueueBackend>,
    topic: Arc<dyn TopicBackend>,
    scope: ArnScope,
    attributes: QueueAttributes,
    create_retry_wait: Duration,
    state: Mutex<ChannelState>,
    released_tx: watch::Sender<bool>,
}

impl ChannelManager {
    pub fn new(queue: Arc<dyn QueueBackend>, topic: Arc<dyn TopicBackend>, scope: ArnScope) -> Self {
        Self {
            queue,
            topic,
            scope,
            attributes: QueueAttributes::default(),
            create_retry_wait: Duration::from_secs(61),
            state: Mutex::new(ChannelState::default()),
            released_tx: watch::Sender::new(false),
        }
    }

    pub fn with_attributes(mut self, attributes: QueueAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_create_retry_wait(mut self, wait: Duration) -> Self {
        self.create_retry_wait = wait;
        self
    }

    pub fn queue(&self) -> &Arc<dyn QueueBackend> {
        &self.queue
    }

    pub fn attributes(&self) -> &QueueAttributes {
        &self.attributes
    }

    /// Create the queue (if needed) and subscribe it to `topic`.
    ///
    /// `topic` may be a short name or an ARN. Transient failures are
    /// retried with a fixed wait, forever. The only error is `Released`.
    pub async fn acquire(&self, channel: &str, topic: &str) -> QueueResult<Subscription> {
        let topic_arn = self.scope.topic(topic);
        let mut released = self.released_tx.subscribe();
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            {
                let mut state = self.state.lock().await;
                if state.released {
                    return Err(QueueError::Released);
                }
                match self.provision(channel, &topic_arn).await {
                    Ok(subscription) => {
                        info!(
                            queue = channel,
                            topic = %subscription.topic_arn,
                            subscription = %subscription.handle,
                            "channel acquired"
                        );
                        state.subscription = Some(subscription.clone());
                        return Ok(subscription);
                    }
                    Err(e) => warn!(
                        queue = channel,
                        attempt,
                        error = %e,
                        retry_in = ?self.create_retry_wait,
                        "failed to provision channel, retrying"
                    ),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.create_retry_wait) => {}
                _ = released.wait_for(|released| *released) => {}
            }
        }
    }

    async fn provision(&self, channel: &str, topic_arn: &str) -> QueueResult<Subscription> {
        match self.queue.create_queue(channel, &self.attributes).await {
            Ok(()) => debug!(queue = channel, "queue created"),
            Err(QueueError::AlreadyExists(_)) => debug!(queue = channel, "queue already exists"),
            Err(e) => return Err(e),
        }

        let queue_arn = self.queue.queue_arn(channel).await?;
        let policy = access_policy(&queue_arn, topic_arn);
        self.queue.set_access_policy(channel, &policy).await?;
        let handle = self.topic.subscribe_queue(topic_arn, &queue_arn).await?;

        Ok(Subscription {
            queue: channel.to_string(),
            queue_arn,
            topic_arn: topic_arn.to_string(),
            handle,
        })
    }

    /// Unsubscribe the stored handle, if any. Failures are logged.
    pub async fn drop_subscription(&self) {
        let mut state = self.state.lock().await;
        if let Some(sub) = state.subscription.take() {
            self.unsubscribe(&sub).await;
        }
    }

    async fn unsubscribe(&self, sub: &Subscription) {
        match self.topic.unsubscribe(&sub.handle).await {
            Ok(()) => debug!(subscription = %sub.handle, "unsubscribed"),
            Err(e) => warn!(subscription = %sub.handle, error = %e, "failed to unsubscribe"),
        }
    }

    /// Tear the channel down. Only the first call does anything; it
    /// returns `true`. Failures are logged, never returned.
    pub async fn release(&self, channel: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.released {
            debug!(queue = channel, "channel already released");
            return false;
        }
        state.released = true;
        self.released_tx.send_replace(true);

        if let Some(sub) = state.subscription.take() {
            self.unsubscribe(&sub).await;
        }
        match self.queue.delete_queue(channel).await {
            Ok(()) => info!(queue = channel, "channel released"),
            Err(e) if e.is_queue_missing() => {
                info!(queue = channel, "channel released (queue was already gone)")
            }
            Err(e) => error!(queue = channel, error = %e, "failed to delete queue"),
        }
        true
    }

    pub async fn subscription(&self) -> Option<Subscription> {
        self.state.lock().await.subscription.clone()
    }

    pub async fn is_released(&self) -> bool {
        self.state.lock().await.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueue;

    fn manager(mem: &Arc<MemoryQueue>) -> ChannelManager {
        ChannelManager::new(mem.clone(), mem.clone(), ArnScope::new("us-east-1", "123"))
    }

    #[tokio::test]
    async fn acquire_twice_succeeds() {
        let mem = Arc::new(MemoryQueue::new());
        let mgr = manager(&mem);

        let first = mgr.acquire("q-i-1", "lifecycle").await.unwrap();
        let second = mgr.acquire("q-i-1", "lifecycle").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.topic_arn, "arn:aws:sns:us-east-1:123:lifecycle");
        assert!(mem.queue_exists("q-i-1"));
        assert_eq!(mem.subscription_count(), 1);
    }

    #[tokio::test]
    async fn acquire_sets_topic_scoped_policy() {
        let mem = Arc::new(MemoryQueue::new());
        let mgr = manager(&mem);
        mgr.acquire("q", "arn:aws:sns:eu-west-1:9:events").await.unwrap();

        let policy = mem.policy("q").unwrap();
        assert!(policy.contains("arn:aws:sns:eu-west-1:9:events"));
    }

    #[tokio::test]
    async fn release_twice_tears_down_once() {
        let mem = Arc::new(MemoryQueue::new());
        let mgr = manager(&mem);
        mgr.acquire("q", "t").await.unwrap();

        assert!(mgr.release("q").await);
        assert!(!mgr.release("q").await);

        let stats = mem.stats();
        assert_eq!(stats.queue_deletes, 1);
        assert_eq!(stats.unsubscribes, 1);
        assert!(!mem.queue_exists("q"));
        assert!(mgr.is_released().await);
    }

    #[tokio::test]
    async fn acquire_after_release_is_refused() {
        let mem = Arc::new(MemoryQueue::new());
        let mgr = manager(&mem);
        mgr.release("q").await;
        assert!(matches!(
            mgr.acquire("q", "t").await,
            Err(QueueError::Released)
        ));
    }

    #[tokio::test]
    async fn release_without_queue_still_completes() {
        let mem = Arc::new(MemoryQueue::new());
        let mgr = manager(&mem);
        assert!(mgr.release("never-created").await);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_retries_transient_create_failures() {
        let mem = Arc::new(MemoryQueue::new());
        mem.fail_next_creates(3);
        let mgr = manager(&mem).with_create_retry_wait(Duration::from_secs(61));

        let start = tokio::time::Instant::now();
        mgr.acquire("q", "t").await.unwrap();

        assert_eq!(mem.stats().creates, 4);
        assert!(start.elapsed() >= Duration::from_secs(183));
    }

    #[tokio::test(start_paused = true)]
    async fn release_during_retry_completes_and_refuses_acquire() {
        let mem = Arc::new(MemoryQueue::new());
        mem.fail_next_creates(u32::MAX);
        let mgr = Arc::new(manager(&mem).with_create_retry_wait(Duration::from_secs(61)));

        let pending = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.acquire("q", "t").await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mem.stats().creates, 1);

        let start = tokio::time::Instant::now();
        assert!(mgr.release("q").await);
        let result = pending.await.unwrap();

        assert!(matches!(result, Err(QueueError::Released)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(mem.stats().creates, 1);
        assert_eq!(mem.stats().unsubscribes, 0);
    }

    #[tokio::test]
    async fn drop_subscription_clears_handle() {
        let mem = Arc::new(MemoryQueue::new());
        let mgr = manager(&mem);
        mgr.acquire("q", "t").await.unwrap();
        mgr.drop_subscription().await;

        assert!(mgr.subscription().await.is_none());
        assert_eq!(mem.subscription_count(), 0);
        // nothing left to unsubscribe on release
        mgr.release("q").await;
        assert_eq!(mem.stats().unsubscribes, 1);
    }
}
