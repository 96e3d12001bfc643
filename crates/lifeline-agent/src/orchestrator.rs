//! One process run: acquire the channel, start up, wait for termination.

use std::future::Future;
use std::sync::Arc;

use lifeline_queue::{ChannelManager, TriggerWatcher, WatcherSettings};
use tracing::info;

use crate::error::AgentResult;
use crate::shutdown::ShutdownService;
use crate::startup::StartupService;

pub struct Orchestrator {
    manager: Arc<ChannelManager>,
    channel: String,
    topic: String,
    watcher: WatcherSettings,
    startup: StartupService,
    shutdown: ShutdownService,
}

impl Orchestrator {
    pub fn new(
        manager: Arc<ChannelManager>,
        channel: impl Into<String>,
        topic: impl Into<String>,
        startup: StartupService,
        shutdown: ShutdownService,
    ) -> Self {
        Self {
            manager,
            channel: channel.into(),
            topic: topic.into(),
            watcher: WatcherSettings::default(),
            startup,
            shutdown,
        }
    }

    pub fn with_watcher_settings(mut self, settings: WatcherSettings) -> Self {
        self.watcher = settings;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    /// Run startup, then block until this instance's termination notice
    /// has been handled.
    ///
    /// Returns the shutdown outcome, or `None` if the trigger stream ended
    /// without one. The channel is left in place; call [`release`] once
    /// the run is over or cancelled.
    ///
    /// [`release`]: Orchestrator::release
    pub async fn run(&self) -> AgentResult<Option<bool>> {
        self.manager.acquire(&self.channel, &self.topic).await?;

        // Poll from the start so a termination notice sent during startup
        // is not missed.
        let stream = TriggerWatcher::new(self.manager.clone(), &self.channel, &self.topic)
            .with_settings(self.watcher)
            .spawn();

        let startup_ok = self.startup.run().await;
        info!(startup_ok, "startup phase finished");

        let shutdown_ok = self.shutdown.run(startup_ok, stream).await;
        info!(?shutdown_ok, "shutdown phase finished");
        Ok(shutdown_ok)
    }

    /// [`run`](Self::run) until it finishes or `stop` resolves, then
    /// release the channel either way.
    ///
    /// Returns `None` when `stop` won. The phase in flight is dropped,
    /// which kills whatever script it was running.
    pub async fn run_until<F>(&self, stop: F) -> Option<AgentResult<Option<bool>>>
    where
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            result = self.run() => Some(result),
            () = stop => None,
        };
        self.release().await;
        outcome
    }

    /// Tear the channel down. Only the first call does anything.
    pub async fn release(&self) -> bool {
        self.manager.release(&self.channel).await
    }
}
