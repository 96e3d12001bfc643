//! Autoscaling API seam.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lifeline_core::{HookRef, LifecycleOutcome};
use tracing::debug;

use crate::error::{LifecycleError, LifecycleResult};

#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// Group the instance currently belongs to, if any.
    async fn instance_group(&self, instance_id: &str) -> LifecycleResult<Option<String>>;

    /// Name of the group's hook for `transition`, if one is defined.
    async fn lifecycle_hook_name(&self, group: &str, transition: &str)
    -> LifecycleResult<Option<String>>;

    async fn record_heartbeat(&self, hook: &HookRef) -> LifecycleResult<()>;

    async fn complete_action(&self, hook: &HookRef, outcome: LifecycleOutcome) -> LifecycleResult<()>;
}

/// Used when cloud integration is disabled: no groups, no hooks.
#[derive(Debug, Clone, Default)]
pub struct NoopAutoScaling;

#[async_trait]
impl AutoScalingApi for NoopAutoScaling {
    async fn instance_group(&self, _instance_id: &str) -> LifecycleResult<Option<String>> {
        Ok(None)
    }

    async fn lifecycle_hook_name(
        &self,
        _group: &str,
        _transition: &str,
    ) -> LifecycleResult<Option<String>> {
        Ok(None)
    }

    async fn record_heartbeat(&self, hook: &HookRef) -> LifecycleResult<()> {
        debug!(%hook, "noop autoscaling: heartbeat");
        Ok(())
    }

    async fn complete_action(&self, hook: &HookRef, outcome: LifecycleOutcome) -> LifecycleResult<()> {
        debug!(%hook, %outcome, "noop autoscaling: complete");
        Ok(())
    }
}

#[derive(Default)]
struct Recorded {
    groups: HashMap<String, String>,
    hooks: HashMap<(String, String), String>,
    heartbeats: Vec<HookRef>,
    completions: Vec<(HookRef, LifecycleOutcome)>,
    complete_calls: u32,
    complete_errors: VecDeque<LifecycleError>,
    fail_heartbeats: bool,
}

/// Scriptable in-memory autoscaling service that records every call.
#[derive(Default)]
pub struct MemoryAutoScaling {
    inner: Mutex<Recorded>,
}

impl MemoryAutoScaling {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_instance(self, instance_id: &str, group: &str) -> Self {
        self.lock()
            .groups
            .insert(instance_id.to_string(), group.to_string());
        self
    }

    pub fn with_hook(self, group: &str, transition: &str, hook_name: &str) -> Self {
        self.lock().hooks.insert(
            (group.to_string(), transition.to_string()),
            hook_name.to_string(),
        );
        self
    }

    /// Queue errors returned by the next completion calls, in order.
    pub fn fail_next_completes(&self, errors: impl IntoIterator<Item = LifecycleError>) {
        self.lock().complete_errors.extend(errors);
    }

    pub fn fail_heartbeats(&self, fail: bool) {
        self.lock().fail_heartbeats = fail;
    }

    /// Successfully recorded heartbeats.
    pub fn heartbeats(&self) -> Vec<HookRef> {
        self.lock().heartbeats.clone()
    }

    /// Successful completions.
    pub fn completions(&self) -> Vec<(HookRef, LifecycleOutcome)> {
        self.lock().completions.clone()
    }

    /// Completion attempts, successful or not.
    pub fn complete_calls(&self) -> u32 {
        self.lock().complete_calls
    }
}

#[async_trait]
impl AutoScalingApi for MemoryAutoScaling {
    async fn instance_group(&self, instance_id: &str) -> LifecycleResult<Option<String>> {
        Ok(self.lock().groups.get(instance_id).cloned())
    }

    async fn lifecycle_hook_name(
        &self,
        group: &str,
        transition: &str,
    ) -> LifecycleResult<Option<String>> {
        Ok(self
            .lock()
            .hooks
            .get(&(group.to_string(), transition.to_string()))
            .cloned())
    }

    async fn record_heartbeat(&self, hook: &HookRef) -> LifecycleResult<()> {
        let mut inner = self.lock();
        if inner.fail_heartbeats {
            return Err(LifecycleError::Api("heartbeat rejected".to_string()));
        }
        inner.heartbeats.push(hook.clone());
        Ok(())
    }

    async fn complete_action(&self, hook: &HookRef, outcome: LifecycleOutcome) -> LifecycleResult<()> {
        let mut inner = self.lock();
        inner.complete_calls += 1;
        if let Some(err) = inner.complete_errors.pop_front() {
            return Err(err);
        }
        inner.completions.push((hook.clone(), outcome));
        Ok(())
    }
}
