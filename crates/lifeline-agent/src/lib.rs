//! lifeline-agent — the per-instance lifecycle state machine.
//!
//! ```text
//! Orchestrator
//!   ├── ChannelManager::acquire        (lifeline-queue)
//!   ├── TriggerWatcher::spawn          (background poll loop)
//!   ├── StartupService
//!   │     ├── StartupResultStore       (true / false / absent)
//!   │     ├── StartupStrategy          (scripts | HTTP signal | skip)
//!   │     └── ship logs, metric, complete launch hook
//!   └── ShutdownService
//!         ├── wait for TERMINATING addressed to this instance
//!         ├── decide (scripts, or the on-startup-fail flag)
//!         └── complete CONTINUE, or hold with heartbeats then ABANDON
//! ```

pub mod error;
pub mod logs;
pub mod notifier;
pub mod orchestrator;
pub mod persist;
pub mod shutdown;
pub mod signal;
pub mod startup;

pub use error::{AgentError, AgentResult};
pub use logs::{LogShipper, LogUploader, NoopLogUploader, RecordingLogUploader, remote_keys};
pub use notifier::{MetricDimensions, MetricsSink, NoopMetrics, Notifier, RecordingMetrics};
pub use orchestrator::Orchestrator;
pub use persist::{StartupResult, StartupResultStore};
pub use shutdown::{ShutdownPolicy, ShutdownService};
pub use signal::{ExternalSignal, SignalServer, signal_router};
pub use startup::{StartupService, StartupStrategy};
