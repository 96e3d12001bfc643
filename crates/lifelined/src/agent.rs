//! Agent profile: startup, wait for termination, shutdown.

use lifeline_core::LifelineConfig;
use tracing::{error, info, warn};

use crate::signal::shutdown_signal;
use crate::wiring::{self, Collaborators};

pub async fn run(cfg: LifelineConfig) -> anyhow::Result<()> {
    cfg.validate_agent()?;

    let identity = wiring::resolve_identity(&cfg.aws).await?;
    let collab = Collaborators::build(&cfg, &identity).await;
    let orchestrator = wiring::orchestrator(&cfg, &identity, &collab).await;
    info!(queue = %orchestrator.channel(), topic = %cfg.queue.topic, "lifecycle agent starting");

    // ── Run until done or signalled, then release ──────────────

    match orchestrator.run_until(shutdown_signal()).await {
        Some(Ok(Some(true))) => info!("shutdown completed"),
        Some(Ok(Some(false))) => warn!("shutdown failed"),
        Some(Ok(None)) => warn!("trigger stream ended without a termination notice"),
        Some(Err(e)) => error!(error = %e, "lifecycle agent stopped"),
        None => info!("signal received, current phase cancelled"),
    }
    info!("lifelined stopped");
    Ok(())
}
