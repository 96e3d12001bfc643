//! Startup phase: run once per instance lifetime, then report.

use std::sync::Arc;

use lifeline_core::{HookRef, LifecycleOutcome};
use lifeline_exec::ScriptPlaybook;
use lifeline_lifecycle::LifecycleController;
use tracing::{error, info, warn};

use crate::logs::LogShipper;
use crate::notifier::Notifier;
use crate::persist::{StartupResult, StartupResultStore};
use crate::signal::ExternalSignal;

/// How a fresh startup decides success.
pub enum StartupStrategy {
    Scripts(ScriptPlaybook),
    ExternalSignal(ExternalSignal),
    /// Nothing to run; always succeeds.
    Skip,
}

impl StartupStrategy {
    fn name(&self) -> &'static str {
        match self {
            StartupStrategy::Scripts(_) => "run-startup-scripts",
            StartupStrategy::ExternalSignal(_) => "wait-external-http-signal",
            StartupStrategy::Skip => "none",
        }
    }
}

pub struct StartupService {
    strategy: StartupStrategy,
    store: StartupResultStore,
    lifecycle: Arc<LifecycleController>,
    hook: Option<HookRef>,
    notifier: Notifier,
    logs: Arc<LogShipper>,
}

impl StartupService {
    pub fn new(
        strategy: StartupStrategy,
        store: StartupResultStore,
        lifecycle: Arc<LifecycleController>,
        notifier: Notifier,
        logs: Arc<LogShipper>,
    ) -> Self {
        Self {
            strategy,
            store,
            lifecycle,
            hook: None,
            notifier,
            logs,
        }
    }

    /// The launch hook to heartbeat and complete, if one was resolved.
    pub fn with_hook(mut self, hook: Option<HookRef>) -> Self {
        self.hook = hook;
        self
    }

    pub fn store(&self) -> &StartupResultStore {
        &self.store
    }

    /// Run startup unless a previous run already recorded an outcome.
    ///
    /// A recorded outcome is returned as-is: no strategy runs, nothing is
    /// written, and the launch hook is left alone.
    pub async fn run(&self) -> bool {
        match self.store.read() {
            StartupResult::Successful => {
                info!(path = %self.store.path().display(), "startup already succeeded, skipping");
                return true;
            }
            StartupResult::Failed => {
                warn!(path = %self.store.path().display(), "startup already failed, skipping");
                return false;
            }
            StartupResult::NotRun => {}
        }

        info!(strategy = self.strategy.name(), "running startup");
        let heartbeat = self.lifecycle.heartbeat_for(self.hook.clone());
        let successful = match &self.strategy {
            StartupStrategy::Scripts(playbook) => playbook.run(heartbeat).await.is_success(),
            StartupStrategy::ExternalSignal(signal) => signal.wait(heartbeat).await,
            StartupStrategy::Skip => true,
        };

        if successful {
            info!("startup succeeded");
        } else {
            error!("startup failed");
        }

        if let Err(e) = self.store.write(successful) {
            error!(error = %e, "unable to persist startup result");
        }

        self.logs.ship("startup", successful).await;
        self.notifier.startup(successful).await;
        self.lifecycle
            .complete(self.hook.as_ref(), LifecycleOutcome::from_success(successful))
            .await;

        successful
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{RecordingMetrics, STARTUP_FAILED, STARTUP_SUCCEEDED};
    use lifeline_exec::CommandExecutor;
    use lifeline_lifecycle::MemoryAutoScaling;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn launch_hook() -> HookRef {
        HookRef {
            instance_id: "i-1".into(),
            group_name: "web".into(),
            hook_name: "warmup".into(),
            action_token: None,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        scripts: std::path::PathBuf,
        store: StartupResultStore,
        api: Arc<MemoryAutoScaling>,
        metrics: Arc<RecordingMetrics>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let scripts = dir.path().join("startup.d");
            std::fs::create_dir_all(&scripts).unwrap();
            let store = StartupResultStore::new(dir.path().join("startup-result"));
            Self {
                _dir: dir,
                scripts,
                store,
                api: Arc::new(MemoryAutoScaling::new()),
                metrics: Arc::new(RecordingMetrics::new()),
            }
        }

        fn service(&self, hook: Option<HookRef>) -> StartupService {
            let executor = CommandExecutor::new().with_shell("sh");
            let playbook = ScriptPlaybook::new(&self.scripts, "", executor);
            let notifier = Notifier::new(self.metrics.clone(), "app", "test", "us-east-1")
                .with_group(hook.as_ref().map(|h| h.group_name.clone()));
            StartupService::new(
                StartupStrategy::Scripts(playbook),
                self.store.clone(),
                Arc::new(LifecycleController::new(self.api.clone())),
                notifier,
                Arc::new(LogShipper::disabled()),
            )
            .with_hook(hook)
        }
    }

    #[tokio::test]
    async fn fresh_success_is_persisted_and_completed() {
        let f = Fixture::new();
        script(&f.scripts, "10-ok.sh", "exit 0");

        assert!(f.service(Some(launch_hook())).run().await);

        assert_eq!(f.store.read(), StartupResult::Successful);
        assert_eq!(
            f.api.completions(),
            vec![(launch_hook(), LifecycleOutcome::Continue)]
        );
        assert_eq!(f.metrics.names(), [STARTUP_SUCCEEDED]);
    }

    #[tokio::test]
    async fn fresh_failure_abandons_launch() {
        let f = Fixture::new();
        script(&f.scripts, "10-bad.sh", "exit 3");

        assert!(!f.service(Some(launch_hook())).run().await);

        assert_eq!(f.store.read(), StartupResult::Failed);
        assert_eq!(
            f.api.completions(),
            vec![(launch_hook(), LifecycleOutcome::Abandon)]
        );
        assert_eq!(f.metrics.names(), [STARTUP_FAILED]);
    }

    #[tokio::test]
    async fn recorded_success_does_not_rerun_scripts() {
        let f = Fixture::new();
        let marker = f.scripts.join("ran");
        script(&f.scripts, "10-mark.sh", &format!("echo x >> {}", marker.display()));
        f.store.write(true).unwrap();

        assert!(f.service(Some(launch_hook())).run().await);
        assert!(f.service(Some(launch_hook())).run().await);

        assert!(!marker.exists());
        assert_eq!(f.api.complete_calls(), 0);
        assert!(f.metrics.sent().is_empty());
    }

    #[tokio::test]
    async fn recorded_failure_is_reported_without_running() {
        let f = Fixture::new();
        script(&f.scripts, "10-ok.sh", "exit 0");
        f.store.write(false).unwrap();

        assert!(!f.service(None).run().await);
        assert_eq!(f.store.read(), StartupResult::Failed);
    }

    #[tokio::test]
    async fn second_process_run_sees_first_result() {
        let f = Fixture::new();
        let marker = f.scripts.join("ran");
        script(&f.scripts, "10-mark.sh", &format!("echo x >> {}", marker.display()));

        assert!(f.service(None).run().await);
        assert!(f.service(None).run().await);

        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "x\n");
    }

    #[tokio::test]
    async fn no_hook_means_no_completion() {
        let f = Fixture::new();
        assert!(f.service(None).run().await);
        assert_eq!(f.api.complete_calls(), 0);
        assert!(f.metrics.sent().is_empty());
    }

    #[tokio::test]
    async fn skip_strategy_succeeds() {
        let f = Fixture::new();
        let service = StartupService::new(
            StartupStrategy::Skip,
            f.store.clone(),
            Arc::new(LifecycleController::new(f.api.clone())),
            Notifier::new(f.metrics.clone(), "app", "test", "us-east-1"),
            Arc::new(LogShipper::disabled()),
        );
        assert!(service.run().await);
        assert_eq!(f.store.read(), StartupResult::Successful);
    }
}
