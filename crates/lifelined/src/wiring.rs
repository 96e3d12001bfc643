//! Composition root: turn a [`LifelineConfig`] into running components.

use std::sync::Arc;

use anyhow::Context;
use lifeline_agent::{
    ExternalSignal, LogShipper, LogUploader, MetricsSink, NoopLogUploader, NoopMetrics, Notifier,
    Orchestrator, ShutdownPolicy, ShutdownService, StartupResultStore, StartupService,
    StartupStrategy,
};
use lifeline_aws::{
    AwsAutoScaling, CloudWatchMetrics, ImdsClient, S3LogUploader, SnsTopic, SqsQueue,
    load_sdk_config,
};
use lifeline_core::config::{AwsConfig, LogDestination, QueueConfig, StartupMode};
use lifeline_core::{ArnScope, LifelineConfig, Transition, hostname};
use lifeline_exec::{CommandExecutor, MacroRenderer, ScriptPlaybook};
use lifeline_lifecycle::{
    AutoScalingApi, CompletionRetry, LifecycleController, NoopAutoScaling, resolve_hook,
};
use lifeline_queue::{
    ChannelManager, NoopQueue, QueueAttributes, QueueBackend, TopicBackend, WatcherSettings,
};
use tracing::{info, warn};

const LOCAL_REGION: &str = "local";
const LOCAL_ACCOUNT: &str = "000000000000";

/// Who and where this instance is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub instance_id: String,
    pub region: String,
    pub account_id: String,
    pub hostname: String,
}

/// Configured values first; with AWS enabled the gaps are filled from the
/// instance metadata service, otherwise from local defaults.
pub async fn resolve_identity(aws: &AwsConfig) -> anyhow::Result<Identity> {
    let host = hostname();
    let configured = (
        aws.instance_id.clone(),
        aws.region.clone(),
        aws.account_id.clone(),
    );

    let identity = match configured {
        (Some(instance_id), Some(region), Some(account_id)) => Identity {
            instance_id,
            region,
            account_id,
            hostname: host,
        },
        (instance_id, region, account_id) if !aws.enabled => Identity {
            instance_id: instance_id.unwrap_or_else(|| host.clone()),
            region: region.unwrap_or_else(|| LOCAL_REGION.to_string()),
            account_id: account_id.unwrap_or_else(|| LOCAL_ACCOUNT.to_string()),
            hostname: host,
        },
        (instance_id, region, account_id) => {
            let doc = ImdsClient::new().identity().await.context(
                "instance identity unavailable: set aws.instance_id, aws.region and aws.account_id",
            )?;
            Identity {
                instance_id: instance_id.unwrap_or(doc.instance_id),
                region: region.unwrap_or(doc.region),
                account_id: account_id.unwrap_or(doc.account_id),
                hostname: host,
            }
        }
    };

    info!(
        instance_id = %identity.instance_id,
        region = %identity.region,
        account_id = %identity.account_id,
        hostname = %identity.hostname,
        "instance identity resolved"
    );
    Ok(identity)
}

/// Cloud-facing collaborators, real or no-op depending on `aws.enabled`.
pub struct Collaborators {
    pub queue: Arc<dyn QueueBackend>,
    pub topic: Arc<dyn TopicBackend>,
    pub autoscaling: Arc<dyn AutoScalingApi>,
    pub metrics: Arc<dyn MetricsSink>,
    pub uploader: Arc<dyn LogUploader>,
}

impl Collaborators {
    pub fn noop() -> Self {
        let queue = Arc::new(NoopQueue);
        Self {
            queue: queue.clone(),
            topic: queue,
            autoscaling: Arc::new(NoopAutoScaling),
            metrics: Arc::new(NoopMetrics),
            uploader: Arc::new(NoopLogUploader),
        }
    }

    pub async fn build(cfg: &LifelineConfig, identity: &Identity) -> Self {
        if !cfg.aws.enabled {
            if cfg.metrics.cloudwatch || cfg.logs.destination == LogDestination::S3 {
                warn!("aws is disabled, metrics and log uploads will be dropped");
            }
            info!("aws disabled, using no-op collaborators");
            return Self::noop();
        }

        let sdk = load_sdk_config(&identity.region).await;
        let metrics: Arc<dyn MetricsSink> = if cfg.metrics.cloudwatch {
            Arc::new(CloudWatchMetrics::new(&sdk, &cfg.metrics.namespace))
        } else {
            Arc::new(NoopMetrics)
        };
        let uploader: Arc<dyn LogUploader> = match (&cfg.logs.destination, &cfg.logs.s3_bucket) {
            (LogDestination::S3, Some(bucket)) => match &cfg.logs.s3_region {
                Some(region) => Arc::new(S3LogUploader::in_region(&sdk, region, bucket)),
                None => Arc::new(S3LogUploader::new(&sdk, bucket)),
            },
            _ => Arc::new(NoopLogUploader),
        };

        info!(region = %identity.region, "aws collaborators ready");
        Self {
            queue: Arc::new(SqsQueue::new(&sdk)),
            topic: Arc::new(SnsTopic::new(&sdk)),
            autoscaling: Arc::new(AwsAutoScaling::new(&sdk)),
            metrics,
            uploader,
        }
    }
}

pub fn renderer(identity: &Identity) -> MacroRenderer {
    MacroRenderer::new(&identity.hostname, &identity.region)
}

/// `<rendered prefix>-<instance id>`
pub fn channel_name(cfg: &LifelineConfig, identity: &Identity) -> String {
    let prefix = renderer(identity).render(&cfg.queue.prefix);
    QueueConfig::queue_name(&prefix, &identity.instance_id)
}

pub fn channel_manager(
    cfg: &LifelineConfig,
    identity: &Identity,
    collab: &Collaborators,
) -> Arc<ChannelManager> {
    let scope = ArnScope::new(&identity.region, &identity.account_id);
    Arc::new(
        ChannelManager::new(collab.queue.clone(), collab.topic.clone(), scope)
            .with_attributes(QueueAttributes {
                visibility_timeout: cfg.queue.visibility_timeout,
                wait_time: cfg.queue.wait_time,
            })
            .with_create_retry_wait(cfg.queue.create_retry_wait),
    )
}

pub fn watcher_settings(cfg: &LifelineConfig) -> WatcherSettings {
    WatcherSettings {
        receive_wait: cfg.queue.wait_time,
        max_backoff: cfg.queue.max_poll_backoff,
        ..WatcherSettings::default()
    }
}

pub fn executor(cfg: &LifelineConfig) -> CommandExecutor {
    CommandExecutor::new().with_heartbeat_interval(cfg.lifecycle.heartbeat_interval)
}

pub fn shutdown_policy(cfg: &LifelineConfig) -> ShutdownPolicy {
    ShutdownPolicy {
        on_startup_fail: cfg.shutdown.on_startup_fail,
        hold: cfg.shutdown.wait_time_on_failure,
        hold_interval: cfg.lifecycle.hold_heartbeat_interval,
    }
}

fn startup_strategy(cfg: &LifelineConfig, executor: &CommandExecutor) -> StartupStrategy {
    match cfg.startup.mode {
        StartupMode::RunStartupScripts => StartupStrategy::Scripts(ScriptPlaybook::new(
            &cfg.startup.scripts_path,
            &cfg.startup.scripts_priority,
            executor.clone(),
        )),
        StartupMode::WaitExternalHttpSignal => StartupStrategy::ExternalSignal(
            ExternalSignal::new(
                cfg.startup.external_signal.port,
                cfg.startup.external_signal.timeout,
            )
            .with_heartbeat_interval(cfg.lifecycle.heartbeat_interval),
        ),
        StartupMode::None => StartupStrategy::Skip,
    }
}

/// Assemble the lifecycle agent.
pub async fn orchestrator(
    cfg: &LifelineConfig,
    identity: &Identity,
    collab: &Collaborators,
) -> Orchestrator {
    let lifecycle = Arc::new(
        LifecycleController::new(collab.autoscaling.clone()).with_retry(CompletionRetry {
            max_attempts: cfg.lifecycle.complete_attempts,
            max_wait: cfg.lifecycle.complete_max_wait,
        }),
    );

    let launch_hook = resolve_hook(
        collab.autoscaling.as_ref(),
        &identity.instance_id,
        Transition::Launching,
    )
    .await;
    let notifier = Notifier::new(
        collab.metrics.clone(),
        &cfg.app.name,
        &cfg.app.environment,
        &identity.region,
    )
    .with_group(launch_hook.as_ref().map(|h| h.group_name.clone()));
    let logs = Arc::new(LogShipper::new(
        collab.uploader.clone(),
        &cfg.app.name,
        &identity.region,
        &identity.hostname,
        cfg.logs.paths.clone(),
    ));

    let executor = executor(cfg);
    let startup = StartupService::new(
        startup_strategy(cfg, &executor),
        StartupResultStore::new(&cfg.startup.persist_file),
        lifecycle.clone(),
        notifier.clone(),
        logs.clone(),
    )
    .with_hook(launch_hook);

    let shutdown = ShutdownService::new(
        &identity.instance_id,
        ScriptPlaybook::new(
            &cfg.shutdown.scripts_path,
            &cfg.shutdown.scripts_priority,
            executor,
        ),
        lifecycle,
        notifier,
        logs,
    )
    .with_policy(shutdown_policy(cfg));

    Orchestrator::new(
        channel_manager(cfg, identity, collab),
        channel_name(cfg, identity),
        &cfg.queue.topic,
        startup,
        shutdown,
    )
    .with_watcher_settings(watcher_settings(cfg))
}
