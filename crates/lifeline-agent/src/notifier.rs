//! Startup/shutdown outcome metrics.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::AgentResult;

pub const STARTUP_SUCCEEDED: &str = "ec2StartupSucceeded";
pub const STARTUP_FAILED: &str = "ec2StartupFailed";
pub const SHUTDOWN_SUCCEEDED: &str = "ec2ShutdownSucceeded";
pub const SHUTDOWN_FAILED: &str = "ec2ShutdownFailed";

/// Dimensions attached to every metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDimensions {
    pub asg_name: String,
    pub region: String,
    pub app_name: String,
    pub environment: String,
}

impl MetricDimensions {
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("asgName", self.asg_name.as_str()),
            ("region", self.region.as_str()),
            ("appName", self.app_name.as_str()),
            ("environment", self.environment.as_str()),
        ]
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn send_metric(&self, dimensions: &MetricDimensions, name: &str) -> AgentResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopMetrics;

#[async_trait]
impl MetricsSink for NoopMetrics {
    async fn send_metric(&self, _dimensions: &MetricDimensions, name: &str) -> AgentResult<()> {
        debug!(metric = name, "metrics disabled");
        Ok(())
    }
}

/// Keeps every metric in memory.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    sent: Mutex<Vec<(MetricDimensions, String)>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(MetricDimensions, String)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, name)| name).collect()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetrics {
    async fn send_metric(&self, dimensions: &MetricDimensions, name: &str) -> AgentResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((dimensions.clone(), name.to_string()));
        Ok(())
    }
}

/// Reports startup and shutdown outcomes. Nothing is sent unless the
/// instance's autoscaling group is known.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn MetricsSink>,
    app_name: String,
    environment: String,
    region: String,
    group: Option<String>,
}

impl Notifier {
    pub fn new(
        sink: Arc<dyn MetricsSink>,
        app_name: impl Into<String>,
        environment: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            app_name: app_name.into(),
            environment: environment.into(),
            region: region.into(),
            group: None,
        }
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    pub async fn startup(&self, successful: bool) {
        let name = if successful { STARTUP_SUCCEEDED } else { STARTUP_FAILED };
        self.send(name, None).await;
    }

    /// `group` overrides the group known at startup, e.g. the one named in
    /// the termination notice.
    pub async fn shutdown(&self, successful: bool, group: Option<&str>) {
        let name = if successful { SHUTDOWN_SUCCEEDED } else { SHUTDOWN_FAILED };
        self.send(name, group).await;
    }

    async fn send(&self, name: &str, group: Option<&str>) {
        let Some(asg_name) = group
            .filter(|g| !g.is_empty())
            .or(self.group.as_deref())
        else {
            debug!(metric = name, "no autoscaling group, not sending metric");
            return;
        };

        let dimensions = MetricDimensions {
            asg_name: asg_name.to_string(),
            region: self.region.clone(),
            app_name: self.app_name.clone(),
            environment: self.environment.clone(),
        };
        match self.sink.send_metric(&dimensions, name).await {
            Ok(()) => info!(metric = name, asg = %dimensions.asg_name, "metric sent"),
            Err(e) => warn!(metric = name, error = %e, "failed to send metric"),
        }
    }
}
