//! Lifecycle action controller: heartbeat and complete a pending hook.

use std::sync::Arc;
use std::time::Duration;

use lifeline_core::{Heartbeat, HookRef, LifecycleOutcome, heartbeat_fn};
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::api::AutoScalingApi;

/// Retry budget for completion calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRetry {
    pub max_attempts: u32,
    /// Upper bound of the uniformly random wait between attempts.
    pub max_wait: Duration,
}

impl Default for CompletionRetry {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            max_wait: Duration::from_secs(120),
        }
    }
}

impl CompletionRetry {
    fn random_wait(&self) -> Duration {
        let max_ms = u64::try_from(self.max_wait.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// How a completion request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed { attempts: u32 },
    /// No hook was resolved, nothing to complete.
    Skipped,
    /// The service has no pending action for the hook any more.
    NoActiveAction { attempts: u32 },
    /// Retry budget exhausted.
    GaveUp { attempts: u32 },
}

impl Completion {
    pub fn is_completed(&self) -> bool {
        matches!(self, Completion::Completed { .. })
    }
}

pub struct LifecycleController {
    api: Arc<dyn AutoScalingApi>,
    retry: CompletionRetry,
}

impl LifecycleController {
    pub fn new(api: Arc<dyn AutoScalingApi>) -> Self {
        Self {
            api,
            retry: CompletionRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: CompletionRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn api(&self) -> &Arc<dyn AutoScalingApi> {
        &self.api
    }

    /// Extend the hook's timeout. Best-effort: failures are only logged.
    pub async fn heartbeat(&self, hook: Option<&HookRef>) {
        let Some(hook) = hook else {
            debug!("no lifecycle hook resolved, skipping heartbeat");
            return;
        };
        info!(%hook, "sending lifecycle heartbeat");
        if let Err(e) = self.api.record_heartbeat(hook).await {
            warn!(%hook, error = %e, "unable to send lifecycle heartbeat");
        }
    }

    /// Complete the hook with `outcome`, retrying with a random wait.
    ///
    /// Gives up at once if the service reports no active lifecycle
    /// action. Never returns an error.
    pub async fn complete(&self, hook: Option<&HookRef>, outcome: LifecycleOutcome) -> Completion {
        let Some(hook) = hook else {
            info!(%outcome, "no lifecycle hook resolved, skipping completion");
            return Completion::Skipped;
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(%hook, %outcome, attempt, "sending COMPLETE lifecycle action");

            let err = match self.api.complete_action(hook, outcome).await {
                Ok(()) => {
                    info!(%hook, %outcome, "lifecycle action completed");
                    return Completion::Completed { attempts: attempt };
                }
                Err(e) => e,
            };

            if err.is_no_active_action() {
                warn!(%hook, error = %err, "no active lifecycle action, not retrying");
                return Completion::NoActiveAction { attempts: attempt };
            }
            if attempt >= max_attempts {
                error!(%hook, %outcome, attempts = attempt, error = %err, "unable to complete lifecycle action");
                return Completion::GaveUp { attempts: attempt };
            }

            let wait = self.retry.random_wait();
            warn!(%hook, attempt, ?wait, error = %err, "failed to complete lifecycle action, retrying");
            tokio::time::sleep(wait).await;
        }
    }

    /// A [`Heartbeat`] that extends `hook`, or only logs when there is none.
    pub fn heartbeat_for(self: &Arc<Self>, hook: Option<HookRef>) -> Heartbeat {
        let controller = self.clone();
        let hook = hook.map(Arc::new);
        heartbeat_fn(move || {
            let controller = controller.clone();
            let hook = hook.clone();
            async move { controller.heartbeat(hook.as_deref()).await }
        })
    }
}
