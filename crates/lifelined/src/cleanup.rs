//! Cleanup profile: run the configured commands for every trigger on the
//! channel, without lifecycle hooks, until stopped.

use std::sync::Arc;

use lifeline_core::{Heartbeat, LifelineConfig, MacroFields, heartbeat_fn};
use lifeline_exec::CommandPlaybook;
use lifeline_queue::{ChannelManager, QueueResult, TriggerWatcher, WatcherSettings};
use tracing::{debug, info, warn};

use crate::signal::shutdown_signal;
use crate::wiring::{self, Collaborators};

/// Commands here are not gating anything, so keep-alives only log.
fn logging_heartbeat() -> Heartbeat {
    heartbeat_fn(|| async { debug!("command still running") })
}

/// Consume triggers forever, running `playbook` for each.
pub async fn serve(
    manager: Arc<ChannelManager>,
    channel: &str,
    topic: &str,
    settings: WatcherSettings,
    playbook: &CommandPlaybook,
) -> QueueResult<()> {
    manager.acquire(channel, topic).await?;
    let mut stream = TriggerWatcher::new(manager.clone(), channel, topic)
        .with_settings(settings)
        .spawn();

    while let Some(event) = stream.next().await {
        info!(%event, "trigger received, running commands");
        let fields: &dyn MacroFields = &event;
        let outcome = playbook.run(Some(fields), logging_heartbeat()).await;
        if outcome.failed > 0 {
            warn!(succeeded = outcome.succeeded, failed = outcome.failed, "some commands failed");
        } else {
            info!(succeeded = outcome.succeeded, "commands finished");
        }
    }
    Ok(())
}

pub async fn run(cfg: LifelineConfig) -> anyhow::Result<()> {
    cfg.validate_cleanup()?;

    let identity = wiring::resolve_identity(&cfg.aws).await?;
    let collab = Collaborators::build(&cfg, &identity).await;
    let manager = wiring::channel_manager(&cfg, &identity, &collab);
    let channel = wiring::channel_name(&cfg, &identity);
    let playbook = CommandPlaybook::new(
        cfg.commands.run.clone(),
        wiring::renderer(&identity),
        wiring::executor(&cfg),
    );
    info!(queue = %channel, commands = cfg.commands.run.len(), "cleanup watcher starting");

    tokio::select! {
        result = serve(manager.clone(), &channel, &cfg.queue.topic, wiring::watcher_settings(&cfg), &playbook) => {
            if let Err(e) = result {
                warn!(error = %e, "cleanup watcher stopped");
            }
        }
        _ = shutdown_signal() => info!("signal received, stopping"),
    }

    manager.release(&channel).await;
    info!("lifelined stopped");
    Ok(())
}
