//! Config loading for the daemon.

use std::path::Path;
use std::time::Duration;

use lifeline_core::LifelineConfig;
use lifeline_core::config::{APP_CONFIG_ENV, config_path, read_file};
use lifeline_core::error::ConfigResult;
use tracing::{info, warn};

/// Wait between attempts while the config file is not there yet.
const READ_RETRY: Duration = Duration::from_secs(10);

/// Locate, read and parse the config, merging `LIFELINE_APP_CONFIG` on
/// top. With `wait`, a missing or unreadable file is retried until it
/// shows up; parse errors are always fatal.
pub async fn load(explicit: Option<&Path>, wait: bool) -> ConfigResult<LifelineConfig> {
    let overlay = std::env::var(APP_CONFIG_ENV).ok();
    load_from(&config_path(explicit), overlay.as_deref(), wait).await
}

pub async fn load_from(path: &Path, overlay: Option<&str>, wait: bool) -> ConfigResult<LifelineConfig> {
    let content = loop {
        match read_file(path) {
            Ok(content) => break content,
            Err(e) if wait => {
                warn!(path = %path.display(), error = %e, retry_in = ?READ_RETRY, "config not readable yet");
                tokio::time::sleep(READ_RETRY).await;
            }
            Err(e) => return Err(e),
        }
    };
    let cfg = LifelineConfig::from_layers(&content, overlay)?;
    info!(path = %path.display(), overlay = overlay.is_some(), "config loaded");
    Ok(cfg)
}
