//! Trigger watcher: background long-poll loop over the instance queue.
//!
//! ```text
//!   POLLING ──message──▶ delete, parse, forward ──▶ POLLING
//!      │
//!      ├──queue missing──▶ unsubscribe stale handle, re-acquire, back off ──▶ POLLING
//!      ├──other error────▶ back off min(attempt, cap) seconds ──▶ POLLING
//!      └──stop───────────▶ STOPPED
//! ```
//!
//! Messages are deleted as soon as they are read, so delivery is
//! at-most-once. Unparseable messages are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use lifeline_core::TriggerEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelManager;
use crate::error::QueueError;

#[derive(Debug, Clone, Copy)]
pub struct WatcherSettings {
    /// Long-poll wait per receive.
    pub receive_wait: Duration,
    /// Upper bound on the error backoff.
    pub max_backoff: Duration,
    /// Parsed events buffered ahead of the consumer.
    pub buffer: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            receive_wait: Duration::from_secs(20),
            max_backoff: Duration::from_secs(30),
            buffer: 16,
        }
    }
}

/// Delay before retry number `attempt`: one second per attempt, capped.
pub fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    Duration::from_secs(u64::from(attempt)).min(cap)
}

pub struct TriggerWatcher {
    manager: Arc<ChannelManager>,
    channel: String,
    topic: String,
    settings: WatcherSettings,
}

impl TriggerWatcher {
    pub fn new(manager: Arc<ChannelManager>, channel: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            manager,
            channel: channel.into(),
            topic: topic.into(),
            settings: WatcherSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start polling on a background task.
    pub fn spawn(self) -> TriggerStream {
        let (events_tx, events_rx) = mpsc::channel(self.settings.buffer.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(events_tx, stop_rx));
        TriggerStream {
            events: events_rx,
            stop_tx,
            handle,
        }
    }

    async fn run(self, events: mpsc::Sender<TriggerEvent>, mut stop: watch::Receiver<bool>) {
        let queue = self.manager.queue().clone();
        let mut attempt: u32 = 0;
        info!(queue = %self.channel, "trigger watcher started");

        'poll: loop {
            let received = tokio::select! {
                _ = stop.changed() => break 'poll,
                r = queue.receive(&self.channel, self.settings.receive_wait) => r,
            };

            match received {
                Ok(messages) => {
                    for message in messages {
                        if let Err(e) = queue.delete_message(&self.channel, &message.receipt).await {
                            warn!(queue = %self.channel, error = %e, "failed to delete message");
                        }
                        let event = match TriggerEvent::parse(&message.body) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(queue = %self.channel, error = %e, "dropping unparseable message");
                                continue;
                            }
                        };
                        debug!(queue = %self.channel, %event, "trigger received");
                        tokio::select! {
                            _ = stop.changed() => break 'poll,
                            sent = events.send(event) => {
                                if sent.is_err() {
                                    debug!("trigger consumer gone");
                                    break 'poll;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    if e.is_queue_missing() {
                        warn!(queue = %self.channel, error = %e, "queue disappeared, re-acquiring channel");
                        let healed = tokio::select! {
                            _ = stop.changed() => break 'poll,
                            r = self.heal() => r,
                        };
                        match healed {
                            Ok(()) => info!(queue = %self.channel, "channel re-acquired"),
                            Err(QueueError::Released) => break 'poll,
                            Err(e) => error!(queue = %self.channel, error = %e, "failed to re-acquire channel"),
                        }
                    } else {
                        warn!(queue = %self.channel, error = %e, "receive failed");
                    }

                    // A freshly recreated queue can still report itself missing for a while.
                    attempt = attempt.saturating_add(1);
                    let delay = backoff_delay(attempt, self.settings.max_backoff);
                    debug!(queue = %self.channel, attempt, ?delay, "backing off before next poll");
                    tokio::select! {
                        _ = stop.changed() => break 'poll,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(queue = %self.channel, "trigger watcher stopped");
    }

    async fn heal(&self) -> Result<(), QueueError> {
        self.manager.drop_subscription().await;
        self.manager.acquire(&self.channel, &self.topic).await.map(|_| ())
    }
}

/// Receiving end of a running [`TriggerWatcher`].
///
/// Dropping the stream stops the watcher.
pub struct TriggerStream {
    events: mpsc::Receiver<TriggerEvent>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TriggerStream {
    /// Next parsed event, or `None` once the watcher has stopped.
    pub async fn next(&mut self) -> Option<TriggerEvent> {
        self.events.recv().await
    }

    /// Block until an event satisfies `pred`, then stop the watcher.
    ///
    /// Events that do not match are logged and discarded.
    pub async fn first_matching<P>(mut self, mut pred: P) -> Option<TriggerEvent>
    where
        P: FnMut(&TriggerEvent) -> bool,
    {
        while let Some(event) = self.events.recv().await {
            if pred(&event) {
                self.stop().await;
                return Some(event);
            }
            debug!(%event, "ignoring trigger");
        }
        None
    }

    /// Stop polling and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("trigger watcher panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{QueueBackend, TopicBackend};
    use crate::memory::MemoryQueue;
    use lifeline_core::{ArnScope, Transition};

    const CHANNEL: &str = "lifeline-i-1";
    const TOPIC: &str = "lifecycle";

    fn notification(instance: &str, transition: &str) -> String {
        let payload = serde_json::json!({
            "EC2InstanceId": instance,
            "AutoScalingGroupName": "web",
            "LifecycleHookName": "drain",
            "LifecycleTransition": transition,
        })
        .to_string();
        serde_json::json!({ "Type": "Notification", "Message": payload }).to_string()
    }

    fn terminating(instance: &str) -> String {
        notification(instance, "autoscaling:EC2_INSTANCE_TERMINATING")
    }

    fn settings() -> WatcherSettings {
        WatcherSettings {
            receive_wait: Duration::from_secs(20),
            max_backoff: Duration::from_secs(30),
            buffer: 4,
        }
    }

    async fn setup() -> (Arc<MemoryQueue>, Arc<ChannelManager>) {
        let mem = Arc::new(MemoryQueue::new());
        let mgr = Arc::new(
            ChannelManager::new(
                mem.clone() as Arc<dyn QueueBackend>,
                mem.clone() as Arc<dyn TopicBackend>,
                ArnScope::new("us-east-1", "1"),
            )
            .with_create_retry_wait(Duration::from_secs(1)),
        );
        mgr.acquire(CHANNEL, TOPIC).await.unwrap();
        (mem, mgr)
    }

    #[test]
    fn backoff_grows_linearly_then_caps() {
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(1, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(7, cap), Duration::from_secs(7));
        assert_eq!(backoff_delay(30, cap), cap);
        assert_eq!(backoff_delay(u32::MAX, cap), cap);
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_and_deletes_messages() {
        let (mem, mgr) = setup().await;
        mem.send(CHANNEL, terminating("i-1")).unwrap();

        let mut stream = TriggerWatcher::new(mgr, CHANNEL, TOPIC)
            .with_settings(settings())
            .spawn();
        let event = stream.next().await.unwrap();

        assert_eq!(event.transition(), Transition::Terminating);
        assert_eq!(event.instance_id(), "i-1");
        assert_eq!(mem.stats().message_deletes, 1);
        assert_eq!(mem.depth(CHANNEL), 0);
        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_is_dropped_and_polling_continues() {
        let (mem, mgr) = setup().await;
        mem.send(CHANNEL, "{{ not json").unwrap();
        mem.send(CHANNEL, r#"{"Message":"[1,2,3]"}"#).unwrap();

        let mut stream = TriggerWatcher::new(mgr, CHANNEL, TOPIC)
            .with_settings(settings())
            .spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        // both bad messages were consumed without producing events
        assert_eq!(mem.stats().message_deletes, 2);

        mem.send(CHANNEL, terminating("i-1")).unwrap();
        let event = stream.next().await.unwrap();
        assert_eq!(event.instance_id(), "i-1");
        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_queue_triggers_one_reacquire() {
        let (mem, mgr) = setup().await;
        let before = mem.stats();

        mem.remove_queue(CHANNEL);
        let mut stream = TriggerWatcher::new(mgr.clone(), CHANNEL, TOPIC)
            .with_settings(settings())
            .spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let after = mem.stats();
        assert_eq!(after.unsubscribes - before.unsubscribes, 1);
        assert_eq!(after.creates - before.creates, 1);
        assert_eq!(after.subscribes - before.subscribes, 1);
        assert!(mem.queue_exists(CHANNEL));

        // polling resumed on the new queue
        let sub = mgr.subscription().await.unwrap();
        assert_eq!(mem.publish(&sub.topic_arn, &terminating("i-1")), 1);
        assert!(stream.next().await.is_some());
        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_missing_queue_backs_off_between_heals() {
        let (mem, mgr) = setup().await;
        let before = mem.stats();
        mem.fail_next_receive(QueueError::QueueMissing(CHANNEL.into()));
        mem.fail_next_receive(QueueError::QueueMissing(CHANNEL.into()));

        let stream = TriggerWatcher::new(mgr, CHANNEL, TOPIC)
            .with_settings(settings())
            .spawn();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(mem.stats().unsubscribes - before.unsubscribes, 1);

        // second heal only after the 1s backoff
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(mem.stats().unsubscribes - before.unsubscribes, 2);

        // then 2s before polling again
        let receives = mem.stats().receives;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(mem.stats().receives, receives);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(mem.stats().receives > receives);
        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_back_off_and_recover() {
        let (mem, mgr) = setup().await;
        mem.fail_next_receive(QueueError::Transport("throttled".into()));
        mem.fail_next_receive(QueueError::Transport("throttled".into()));
        mem.send(CHANNEL, terminating("i-1")).unwrap();

        let start = tokio::time::Instant::now();
        let mut stream = TriggerWatcher::new(mgr, CHANNEL, TOPIC)
            .with_settings(settings())
            .spawn();
        let event = stream.next().await.unwrap();

        assert_eq!(event.instance_id(), "i-1");
        // 1s then 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(mem.stats().queue_deletes, 0);
        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_matching_filters_by_instance() {
        let (mem, mgr) = setup().await;
        mem.send(CHANNEL, notification("i-1", "autoscaling:EC2_INSTANCE_LAUNCHING")).unwrap();
        mem.send(CHANNEL, terminating("i-other")).unwrap();
        mem.send(CHANNEL, terminating("i-1")).unwrap();

        let stream = TriggerWatcher::new(mgr, CHANNEL, TOPIC)
            .with_settings(settings())
            .spawn();
        let event = stream
            .first_matching(|e| e.is_termination_of("i-1"))
            .await
            .unwrap();

        assert_eq!(event.instance_id(), "i-1");
        assert_eq!(event.transition(), Transition::Terminating);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_an_idle_watcher() {
        let (_mem, mgr) = setup().await;
        let stream = TriggerWatcher::new(mgr, CHANNEL, TOPIC)
            .with_settings(settings())
            .spawn();
        tokio::time::sleep(Duration::from_secs(5)).await;
        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn released_channel_stops_healing() {
        let (mem, mgr) = setup().await;
        mgr.release(CHANNEL).await;

        let mut stream = TriggerWatcher::new(mgr, CHANNEL, TOPIC)
            .with_settings(settings())
            .spawn();
        assert!(stream.next().await.is_none());
        assert!(!mem.queue_exists(CHANNEL));
    }
}
