use async_trait::async_trait;
use aws_sdk_autoscaling::Client;
use aws_sdk_autoscaling::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use lifeline_core::{HookRef, LifecycleOutcome};
use lifeline_lifecycle::{AutoScalingApi, LifecycleError, LifecycleResult};

fn api_error<E>(err: SdkError<E>) -> LifecycleError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let text = DisplayErrorContext(&err).to_string();
    let no_action = err
        .message()
        .is_some_and(|m| m.to_ascii_lowercase().contains("no active lifecycle action"));
    if no_action {
        LifecycleError::NoActiveAction(text)
    } else {
        LifecycleError::Api(text)
    }
}

/// EC2 Auto Scaling lifecycle hooks.
pub struct AwsAutoScaling {
    client: Client,
}

impl AwsAutoScaling {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl AutoScalingApi for AwsAutoScaling {
    async fn instance_group(&self, instance_id: &str) -> LifecycleResult<Option<String>> {
        let out = self
            .client
            .describe_auto_scaling_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(api_error)?;
        Ok(out
            .auto_scaling_instances()
            .iter()
            .find_map(|i| i.auto_scaling_group_name().map(String::from)))
    }

    async fn lifecycle_hook_name(
        &self,
        group: &str,
        transition: &str,
    ) -> LifecycleResult<Option<String>> {
        let out = self
            .client
            .describe_lifecycle_hooks()
            .auto_scaling_group_name(group)
            .send()
            .await
            .map_err(api_error)?;
        Ok(out
            .lifecycle_hooks()
            .iter()
            .filter(|h| h.lifecycle_transition() == Some(transition))
            .find_map(|h| h.lifecycle_hook_name().map(String::from)))
    }

    async fn record_heartbeat(&self, hook: &HookRef) -> LifecycleResult<()> {
        self.client
            .record_lifecycle_action_heartbeat()
            .auto_scaling_group_name(&hook.group_name)
            .lifecycle_hook_name(&hook.hook_name)
            .instance_id(&hook.instance_id)
            .set_lifecycle_action_token(hook.action_token.clone())
            .send()
            .await
            .map(|_| ())
            .map_err(api_error)
    }

    async fn complete_action(&self, hook: &HookRef, outcome: LifecycleOutcome) -> LifecycleResult<()> {
        self.client
            .complete_lifecycle_action()
            .auto_scaling_group_name(&hook.group_name)
            .lifecycle_hook_name(&hook.hook_name)
            .instance_id(&hook.instance_id)
            .set_lifecycle_action_token(hook.action_token.clone())
            .lifecycle_action_result(outcome.as_str())
            .send()
            .await
            .map(|_| ())
            .map_err(api_error)
    }
}
