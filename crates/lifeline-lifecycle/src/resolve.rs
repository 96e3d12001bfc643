//! Looking up the lifecycle hook that is holding this instance.

use lifeline_core::{HookRef, Transition};
use tracing::{info, warn};

use crate::api::AutoScalingApi;

/// Find this instance's group and the group's hook for `transition`.
///
/// `None` means no lifecycle coordination is possible: the instance is
/// not in a group, the group has no such hook, or the lookup failed.
pub async fn resolve_hook(
    api: &dyn AutoScalingApi,
    instance_id: &str,
    transition: Transition,
) -> Option<HookRef> {
    let Some(transition_name) = transition.as_hook_transition() else {
        warn!(%transition, "cannot resolve a hook for this transition");
        return None;
    };

    let group = match api.instance_group(instance_id).await {
        Ok(Some(group)) => group,
        Ok(None) => {
            warn!(instance_id, "instance is not in an autoscaling group");
            return None;
        }
        Err(e) => {
            warn!(instance_id, error = %e, "unable to look up autoscaling group");
            return None;
        }
    };

    let hook_name = match api.lifecycle_hook_name(&group, transition_name).await {
        Ok(Some(name)) => name,
        Ok(None) => {
            warn!(instance_id, group = %group, %transition, "no lifecycle hook for transition");
            return None;
        }
        Err(e) => {
            warn!(group = %group, error = %e, "unable to look up lifecycle hooks");
            return None;
        }
    };

    info!(instance_id, group = %group, hook = %hook_name, "resolved lifecycle hook");
    Some(HookRef {
        instance_id: instance_id.to_string(),
        group_name: group,
        hook_name,
        action_token: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MemoryAutoScaling, NoopAutoScaling};
    use lifeline_core::LAUNCHING_TRANSITION;

    #[tokio::test]
    async fn resolves_launch_hook() {
        let api = MemoryAutoScaling::new()
            .with_instance("i-1", "web")
            .with_hook("web", LAUNCHING_TRANSITION, "warmup");

        let hook = resolve_hook(&api, "i-1", Transition::Launching).await.unwrap();
        assert_eq!(hook.group_name, "web");
        assert_eq!(hook.hook_name, "warmup");
        assert_eq!(hook.action_token, None);
    }

    #[tokio::test]
    async fn instance_outside_group_has_no_hook() {
        let api = MemoryAutoScaling::new();
        assert!(resolve_hook(&api, "i-1", Transition::Launching).await.is_none());
    }

    #[tokio::test]
    async fn group_without_matching_hook() {
        let api = MemoryAutoScaling::new()
            .with_instance("i-1", "web")
            .with_hook("web", "autoscaling:EC2_INSTANCE_TERMINATING", "drain");
        assert!(resolve_hook(&api, "i-1", Transition::Launching).await.is_none());
    }

    #[tokio::test]
    async fn noop_api_resolves_nothing() {
        assert!(resolve_hook(&NoopAutoScaling, "i-1", Transition::Launching).await.is_none());
    }

    #[tokio::test]
    async fn unknown_transition_resolves_nothing() {
        let api = MemoryAutoScaling::new().with_instance("i-1", "web");
        assert!(resolve_hook(&api, "i-1", Transition::Unknown).await.is_none());
    }
}
