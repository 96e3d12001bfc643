//! In-memory queue and topic backend.
//!
//! Behaves like the cloud services closely enough to exercise the channel
//! manager and watcher: queues are keyed by name, subscriptions fan topic
//! publishes out to queues, received messages stay in flight until
//! deleted. Every call is counted and failures can be scripted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::backend::{QueueAttributes, QueueBackend, RawMessage, TopicBackend};
use crate::error::{QueueError, QueueResult};

const ARN_PREFIX: &str = "arn:aws:sqs:memory:000000000000:";
const MAX_BATCH: usize = 10;

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryQueueStats {
    pub creates: u32,
    pub queue_deletes: u32,
    pub subscribes: u32,
    pub unsubscribes: u32,
    pub receives: u32,
    pub message_deletes: u32,
}

#[derive(Default)]
struct MemQueue {
    messages: VecDeque<String>,
    policy: Option<String>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, MemQueue>,
    /// subscription handle → (topic arn, queue arn)
    subscriptions: HashMap<String, (String, String)>,
    in_flight: HashMap<String, String>,
    next_id: u64,
    fail_receives: VecDeque<QueueError>,
    fail_creates: u32,
    stats: MemoryQueueStats,
}

#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> MemoryQueueStats {
        self.lock().stats
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        self.lock().queues.get(name).and_then(|q| q.policy.clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Messages waiting in `name` (not counting in-flight ones).
    pub fn depth(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.messages.len())
    }

    /// Put a raw body directly onto a queue.
    pub fn send(&self, name: &str, body: impl Into<String>) -> QueueResult<()> {
        {
            let mut inner = self.lock();
            let queue = inner
                .queues
                .get_mut(name)
                .ok_or_else(|| QueueError::QueueMissing(name.to_string()))?;
            queue.messages.push_back(body.into());
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Deliver `body` to every queue subscribed to `topic_arn`. Returns
    /// the number of queues reached.
    pub fn publish(&self, topic_arn: &str, body: &str) -> usize {
        let delivered = {
            let mut inner = self.lock();
            let targets: Vec<String> = inner
                .subscriptions
                .values()
                .filter(|(topic, _)| topic == topic_arn)
                .filter_map(|(_, queue_arn)| queue_arn.strip_prefix(ARN_PREFIX))
                .map(String::from)
                .collect();
            let mut delivered = 0;
            for name in targets {
                if let Some(queue) = inner.queues.get_mut(&name) {
                    queue.messages.push_back(body.to_string());
                    delivered += 1;
                }
            }
            delivered
        };
        if delivered > 0 {
            self.notify.notify_one();
        }
        delivered
    }

    /// Delete a queue behind the manager's back.
    pub fn remove_queue(&self, name: &str) {
        self.lock().queues.remove(name);
        self.notify.notify_one();
    }

    /// Make the next receive fail with `err`.
    pub fn fail_next_receive(&self, err: QueueError) {
        self.lock().fail_receives.push_back(err);
    }

    /// Make the next `n` creates fail with a transport error.
    pub fn fail_next_creates(&self, n: u32) {
        self.lock().fail_creates = n;
    }

    fn try_receive(&self, name: &str) -> QueueResult<Vec<RawMessage>> {
        let mut inner = self.lock();
        if let Some(err) = inner.fail_receives.pop_front() {
            return Err(err);
        }
        let Inner {
            queues,
            in_flight,
            next_id,
            ..
        } = &mut *inner;
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| QueueError::QueueMissing(name.to_string()))?;

        let mut batch = Vec::new();
        while batch.len() < MAX_BATCH {
            let Some(body) = queue.messages.pop_front() else {
                break;
            };
            *next_id += 1;
            let receipt = format!("rcpt-{next_id}");
            in_flight.insert(receipt.clone(), body.clone());
            batch.push(RawMessage { receipt, body });
        }
        Ok(batch)
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn create_queue(&self, name: &str, _attributes: &QueueAttributes) -> QueueResult<()> {
        let mut inner = self.lock();
        inner.stats.creates += 1;
        if inner.fail_creates > 0 {
            inner.fail_creates -= 1;
            return Err(QueueError::Transport("injected create failure".to_string()));
        }
        if inner.queues.contains_key(name) {
            return Err(QueueError::AlreadyExists(name.to_string()));
        }
        inner.queues.insert(name.to_string(), MemQueue::default());
        Ok(())
    }

    async fn queue_arn(&self, name: &str) -> QueueResult<String> {
        if self.queue_exists(name) {
            Ok(format!("{ARN_PREFIX}{name}"))
        } else {
            Err(QueueError::QueueMissing(name.to_string()))
        }
    }

    async fn set_access_policy(&self, name: &str, policy: &str) -> QueueResult<()> {
        let mut inner = self.lock();
        let queue = inner
            .queues
            .get_mut(name)
            .ok_or_else(|| QueueError::QueueMissing(name.to_string()))?;
        queue.policy = Some(policy.to_string());
        Ok(())
    }

    async fn receive(&self, name: &str, wait: Duration) -> QueueResult<Vec<RawMessage>> {
        self.lock().stats.receives += 1;
        let deadline = Instant::now() + wait;
        loop {
            let batch = self.try_receive(name)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn delete_message(&self, _name: &str, receipt: &str) -> QueueResult<()> {
        let mut inner = self.lock();
        inner.stats.message_deletes += 1;
        inner.in_flight.remove(receipt);
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> QueueResult<()> {
        let mut inner = self.lock();
        inner.stats.queue_deletes += 1;
        match inner.queues.remove(name) {
            Some(_) => Ok(()),
            None => Err(QueueError::QueueMissing(name.to_string())),
        }
    }
}

#[async_trait]
impl TopicBackend for MemoryQueue {
    async fn subscribe_queue(&self, topic_arn: &str, queue_arn: &str) -> QueueResult<String> {
        let mut inner = self.lock();
        inner.stats.subscribes += 1;
        let existing = inner
            .subscriptions
            .iter()
            .find(|(_, (t, q))| t == topic_arn && q == queue_arn)
            .map(|(handle, _)| handle.clone());
        if let Some(handle) = existing {
            return Ok(handle);
        }
        inner.next_id += 1;
        let handle = format!("{topic_arn}:sub-{}", inner.next_id);
        inner
            .subscriptions
            .insert(handle.clone(), (topic_arn.to_string(), queue_arn.to_string()));
        Ok(handle)
    }

    async fn unsubscribe(&self, subscription: &str) -> QueueResult<()> {
        let mut inner = self.lock();
        inner.stats.unsubscribes += 1;
        match inner.subscriptions.remove(subscription) {
            Some(_) => Ok(()),
            None => Err(QueueError::Subscription(format!(
                "subscription not found: {subscription}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_twice_reports_existing() {
        let q = MemoryQueue::new();
        q.create_queue("a", &QueueAttributes::default()).await.unwrap();
        let err = q.create_queue("a", &QueueAttributes::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyExists(_)));
        assert_eq!(q.stats().creates, 2);
    }

    #[tokio::test]
    async fn publish_reaches_subscribed_queues_only() {
        let q = MemoryQueue::new();
        q.create_queue("a", &QueueAttributes::default()).await.unwrap();
        q.create_queue("b", &QueueAttributes::default()).await.unwrap();
        let arn_a = q.queue_arn("a").await.unwrap();
        q.subscribe_queue("topic", &arn_a).await.unwrap();

        assert_eq!(q.publish("topic", "hello"), 1);
        assert_eq!(q.depth("a"), 1);
        assert_eq!(q.depth("b"), 0);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let q = MemoryQueue::new();
        let first = q.subscribe_queue("t", "arn:q").await.unwrap();
        let second = q.subscribe_queue("t", "arn:q").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(q.subscription_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_waits_for_message() {
        let q = std::sync::Arc::new(MemoryQueue::new());
        q.create_queue("a", &QueueAttributes::default()).await.unwrap();

        let sender = q.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            sender.send("a", "late").unwrap();
        });

        let batch = q.receive("a", Duration::from_secs(20)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_empty() {
        let q = MemoryQueue::new();
        q.create_queue("a", &QueueAttributes::default()).await.unwrap();
        let batch = q.receive("a", Duration::from_secs(20)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn receive_on_missing_queue() {
        let q = MemoryQueue::new();
        let err = q.receive("gone", Duration::from_millis(1)).await.unwrap_err();
        assert!(err.is_queue_missing());
    }

    #[tokio::test]
    async fn scripted_receive_failure_is_one_shot() {
        let q = MemoryQueue::new();
        q.create_queue("a", &QueueAttributes::default()).await.unwrap();
        q.fail_next_receive(QueueError::Transport("boom".into()));
        assert!(q.receive("a", Duration::ZERO).await.is_err());
        assert!(q.receive("a", Duration::ZERO).await.is_ok());
    }
}
