//! Shutdown phase: wait for this instance's termination notice, decide,
//! then release or hold the lifecycle hook.

use std::sync::Arc;
use std::time::Duration;

use lifeline_core::{Heartbeat, HeartbeatTicker, HookRef, LifecycleOutcome, TriggerEvent};
use lifeline_exec::ScriptPlaybook;
use lifeline_lifecycle::LifecycleController;
use lifeline_queue::TriggerStream;
use tracing::{error, info, warn};

use crate::logs::LogShipper;
use crate::notifier::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Shutdown outcome when startup failed. Scripts do not run then.
    pub on_startup_fail: bool,
    /// How long to hold a failed termination. Zero disables the hold.
    pub hold: Duration,
    pub hold_interval: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            on_startup_fail: true,
            hold: Duration::ZERO,
            hold_interval: Duration::from_secs(60),
        }
    }
}

pub struct ShutdownService {
    playbook: ScriptPlaybook,
    lifecycle: Arc<LifecycleController>,
    notifier: Notifier,
    logs: Arc<LogShipper>,
    policy: ShutdownPolicy,
    instance_id: String,
}

impl ShutdownService {
    pub fn new(
        instance_id: impl Into<String>,
        playbook: ScriptPlaybook,
        lifecycle: Arc<LifecycleController>,
        notifier: Notifier,
        logs: Arc<LogShipper>,
    ) -> Self {
        Self {
            playbook,
            lifecycle,
            notifier,
            logs,
            policy: ShutdownPolicy::default(),
            instance_id: instance_id.into(),
        }
    }

    pub fn with_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether termination may proceed.
    pub async fn decide(&self, startup_ok: bool, heartbeat: Heartbeat) -> bool {
        if !startup_ok {
            info!(
                on_startup_fail = self.policy.on_startup_fail,
                "startup failed, not running shutdown scripts"
            );
            return self.policy.on_startup_fail;
        }
        let outcome = self.playbook.run(heartbeat).await;
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "shutdown scripts finished"
        );
        outcome.is_success()
    }

    /// Block until a termination notice for this instance arrives, then
    /// handle it. `None` if the stream ended first.
    pub async fn run(&self, startup_ok: bool, stream: TriggerStream) -> Option<bool> {
        info!(instance_id = %self.instance_id, "waiting for termination notice");
        let id = self.instance_id.clone();
        let Some(event) = stream.first_matching(|e| e.is_termination_of(&id)).await else {
            warn!("trigger stream ended before a termination notice arrived");
            return None;
        };
        Some(self.handle(startup_ok, &event).await)
    }

    /// Run the shutdown decision for `event` and settle its hook.
    pub async fn handle(&self, startup_ok: bool, event: &TriggerEvent) -> bool {
        info!(%event, "termination notice received");
        let hook = event.hook_ref();
        let heartbeat = self.lifecycle.heartbeat_for(Some(hook.clone()));

        let successful = self.decide(startup_ok, heartbeat.clone()).await;
        self.logs.ship("shutdown", successful).await;
        self.notifier
            .shutdown(successful, Some(event.group_name()))
            .await;

        if successful {
            info!(%hook, "shutdown succeeded, releasing instance");
            self.lifecycle
                .complete(Some(&hook), LifecycleOutcome::Continue)
                .await;
        } else {
            error!(%hook, "shutdown failed");
            self.hold(&hook, heartbeat).await;
            self.lifecycle
                .complete(Some(&hook), LifecycleOutcome::Abandon)
                .await;
        }
        successful
    }

    /// Keep the hook alive for the configured hold so an operator can
    /// step in. Returns the number of heartbeats sent.
    async fn hold(&self, hook: &HookRef, heartbeat: Heartbeat) -> u64 {
        if self.policy.hold.is_zero() {
            return 0;
        }
        warn!(
            %hook,
            hold = ?self.policy.hold,
            interval = ?self.policy.hold_interval,
            "holding termination for operator intervention"
        );
        let ticker = HeartbeatTicker::now_and_every(heartbeat, self.policy.hold_interval);
        tokio::time::sleep(self.policy.hold).await;
        let beats = ticker.stop().await;
        info!(%hook, beats, "hold expired, letting termination proceed");
        beats
    }
}
