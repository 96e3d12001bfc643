//! Heartbeat callbacks and the background ticker that drives them.
//!
//! Long-running work (scripts, waiting for an external signal, holding a
//! failed shutdown) receives a [`Heartbeat`] and must fire it
//! periodically so the autoscaling lifecycle hook does not time out.
//! The callback itself is always best-effort: it logs and swallows its
//! own failures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback that records a heartbeat against whatever is waiting on us.
pub type Heartbeat = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

/// Wrap an async closure as a [`Heartbeat`].
pub fn heartbeat_fn<F, Fut>(f: F) -> Heartbeat
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as BoxFuture)
}

/// A heartbeat that does nothing.
pub fn noop_heartbeat() -> Heartbeat {
    heartbeat_fn(|| async {})
}

/// Fires a heartbeat on a fixed period until stopped or dropped.
pub struct HeartbeatTicker {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<u64>>,
}

impl HeartbeatTicker {
    /// First beat after one full period.
    pub fn every(heartbeat: Heartbeat, period: Duration) -> Self {
        Self::spawn(heartbeat, period, false)
    }

    /// First beat immediately, then every period.
    pub fn now_and_every(heartbeat: Heartbeat, period: Duration) -> Self {
        Self::spawn(heartbeat, period, true)
    }

    fn spawn(heartbeat: Heartbeat, period: Duration, immediate: bool) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let start = if immediate {
                tokio::time::Instant::now()
            } else {
                tokio::time::Instant::now() + period
            };
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut beats = 0u64;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        heartbeat().await;
                        beats += 1;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            debug!(beats, "heartbeat ticker stopped");
            beats
        });

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stop ticking and return the number of beats fired.
    ///
    /// A beat already in flight is allowed to finish.
    pub async fn stop(mut self) -> u64 {
        let _ = self.shutdown_tx.send(true);
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for HeartbeatTicker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting() -> (Heartbeat, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let hb = heartbeat_fn(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        (hb, count)
    }

    #[tokio::test(start_paused = true)]
    async fn every_waits_one_period_first() {
        let (hb, count) = counting();
        let ticker = HeartbeatTicker::every(hb, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticker.stop().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn now_and_every_fires_immediately() {
        let (hb, count) = counting();
        let ticker = HeartbeatTicker::now_and_every(hb, Duration::from_secs(120));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        ticker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_ticking() {
        let (hb, count) = counting();
        let ticker = HeartbeatTicker::now_and_every(hb, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(ticker);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn noop_heartbeat_completes() {
        noop_heartbeat()().await;
    }
}
