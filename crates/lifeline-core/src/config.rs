//! lifeline.toml configuration.
//!
//! The file is located via `--config`, else `LIFELINE_CONFIG_FILE`, else
//! [`DEFAULT_CONFIG_PATH`]. An inline TOML document in
//! `LIFELINE_APP_CONFIG` is deep-merged over the file before parsing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_duration;
use crate::error::{ConfigError, ConfigResult};

pub const CONFIG_FILE_ENV: &str = "LIFELINE_CONFIG_FILE";
pub const APP_CONFIG_ENV: &str = "LIFELINE_APP_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lifeline/lifeline.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifelineConfig {
    pub aws: AwsConfig,
    pub app: AppConfig,
    pub queue: QueueConfig,
    pub startup: StartupConfig,
    pub shutdown: ShutdownConfig,
    pub lifecycle: LifecycleConfig,
    pub commands: CommandsConfig,
    pub logs: LogsConfig,
    pub metrics: MetricsConfig,
}

/// Cloud identity. Unset values are looked up from instance metadata
/// when `enabled` is true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub enabled: bool,
    pub region: Option<String>,
    pub account_id: Option<String>,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "lifeline".to_string(),
            environment: "dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Topic short name or ARN.
    pub topic: String,
    /// Queue name prefix; macros are rendered before the instance id is appended.
    pub prefix: String,
    #[serde(with = "serde_duration")]
    pub visibility_timeout: Duration,
    #[serde(with = "serde_duration")]
    pub wait_time: Duration,
    #[serde(with = "serde_duration")]
    pub create_retry_wait: Duration,
    #[serde(with = "serde_duration")]
    pub max_poll_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            prefix: "lifeline".to_string(),
            visibility_timeout: Duration::from_secs(3600),
            wait_time: Duration::from_secs(20),
            create_retry_wait: Duration::from_secs(61),
            max_poll_backoff: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// `<rendered prefix>-<instance id>`.
    pub fn queue_name(rendered_prefix: &str, instance_id: &str) -> String {
        format!("{rendered_prefix}-{instance_id}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupMode {
    RunStartupScripts,
    WaitExternalHttpSignal,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub mode: StartupMode,
    pub scripts_path: PathBuf,
    /// Colon-separated filename suffixes, highest priority first.
    pub scripts_priority: String,
    pub persist_file: PathBuf,
    pub external_signal: ExternalSignalConfig,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            mode: StartupMode::RunStartupScripts,
            scripts_path: PathBuf::from("/etc/lifeline/startup.d"),
            scripts_priority: String::new(),
            persist_file: PathBuf::from("/var/lib/lifeline/startup-result"),
            external_signal: ExternalSignalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSignalConfig {
    pub port: u16,
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
}

impl Default for ExternalSignalConfig {
    fn default() -> Self {
        Self {
            port: 8899,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub scripts_path: PathBuf,
    pub scripts_priority: String,
    /// Whether shutdown counts as successful when startup failed.
    pub on_startup_fail: bool,
    /// Upper bound on the failure hold loop; zero disables it.
    #[serde(with = "serde_duration")]
    pub wait_time_on_failure: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            scripts_path: PathBuf::from("/etc/lifeline/shutdown.d"),
            scripts_priority: String::new(),
            on_startup_fail: true,
            wait_time_on_failure: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    #[serde(with = "serde_duration")]
    pub heartbeat_interval: Duration,
    pub complete_attempts: u32,
    #[serde(with = "serde_duration")]
    pub complete_max_wait: Duration,
    #[serde(with = "serde_duration")]
    pub hold_heartbeat_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(120),
            complete_attempts: 7,
            complete_max_wait: Duration::from_secs(120),
            hold_heartbeat_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub run: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
    S3,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub destination: LogDestination,
    pub paths: Vec<PathBuf>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub cloudwatch: bool,
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cloudwatch: false,
            namespace: "Lifeline".to_string(),
        }
    }
}

impl LifelineConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = read_file(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse `file` with `overlay` deep-merged on top of it.
    pub fn from_layers(file: &str, overlay: Option<&str>) -> ConfigResult<Self> {
        let mut base: toml::Value =
            toml::from_str(file).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Some(overlay) = overlay.filter(|s| !s.trim().is_empty()) {
            let over: toml::Value = toml::from_str(overlay)
                .map_err(|e| ConfigError::Parse(format!("{APP_CONFIG_ENV}: {e}")))?;
            merge_toml(&mut base, over);
        }
        base.try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
    }

    /// Checks required by the lifecycle agent.
    pub fn validate_agent(&self) -> ConfigResult<()> {
        self.validate_queue()?;

        match self.startup.mode {
            StartupMode::RunStartupScripts if self.startup.scripts_path.as_os_str().is_empty() => {
                return Err(ConfigError::Missing("startup.scripts_path"));
            }
            StartupMode::WaitExternalHttpSignal if self.startup.external_signal.port == 0 => {
                return Err(ConfigError::Invalid {
                    key: "startup.external_signal.port",
                    reason: "port must be non-zero".to_string(),
                });
            }
            _ => {}
        }
        if self.startup.persist_file.as_os_str().is_empty() {
            return Err(ConfigError::Missing("startup.persist_file"));
        }
        if self.shutdown.scripts_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("shutdown.scripts_path"));
        }
        if self.lifecycle.complete_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "lifecycle.complete_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.lifecycle.hold_heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "lifecycle.hold_heartbeat_interval",
                reason: "must be positive".to_string(),
            });
        }
        self.validate_logs()
    }

    /// Checks required by the generic cleanup profile.
    pub fn validate_cleanup(&self) -> ConfigResult<()> {
        self.validate_queue()?;
        if self.commands.run.is_empty() {
            return Err(ConfigError::Missing("commands.run"));
        }
        self.validate_logs()
    }

    fn validate_queue(&self) -> ConfigResult<()> {
        if self.queue.topic.trim().is_empty() {
            return Err(ConfigError::Missing("queue.topic"));
        }
        if self.queue.prefix.trim().is_empty() {
            return Err(ConfigError::Missing("queue.prefix"));
        }
        Ok(())
    }

    fn validate_logs(&self) -> ConfigResult<()> {
        if self.logs.destination == LogDestination::S3
            && self.logs.s3_bucket.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Missing("logs.s3_bucket"));
        }
        Ok(())
    }
}

/// Read a config file, keeping I/O failures distinct from parse failures.
pub fn read_file(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Pick the config file: explicit path, then `LIFELINE_CONFIG_FILE`, then the default.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var(CONFIG_FILE_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// Merge `over` into `base`. Tables merge key by key; anything else replaces.
pub fn merge_toml(base: &mut toml::Value, over: toml::Value) {
    match (base, over) {
        (toml::Value::Table(base), toml::Value::Table(over)) => {
            for (key, value) in over {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, over) => *base = over,
    }
}
