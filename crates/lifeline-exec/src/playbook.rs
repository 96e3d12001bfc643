//! Playbooks: ordered batches of commands run through the executor.
//!
//! Two flavours with different failure policies:
//!
//! - [`ScriptPlaybook`]: `*.sh` files from a directory, ordered by a
//!   priority list. Gating: stops at the first failing script.
//! - [`CommandPlaybook`]: a static list of command templates with macros
//!   rendered per trigger. Non-gating: every command runs and outcomes
//!   are only logged.
//!
//! Neither returns an error. Spawn failures and timeouts are logged and
//! counted as a failure of that one command.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lifeline_core::{Heartbeat, MacroFields};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::ExecResult;
use crate::executor::{CommandExecutor, CommandOutput};
use crate::macros::MacroRenderer;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Colon-separated filename suffixes, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityList {
    entries: Vec<String>,
}

impl PriorityList {
    pub fn parse(raw: &str) -> Self {
        Self {
            entries: raw
                .split(':')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    /// Index of the first entry `script` ends with; unmatched scripts rank last.
    pub fn rank(&self, script: &str) -> usize {
        self.entries
            .iter()
            .position(|suffix| script.ends_with(suffix.as_str()))
            .unwrap_or(self.entries.len())
    }

    /// Stable sort; unmatched scripts keep discovery order.
    pub fn order(&self, scripts: &mut [PathBuf]) {
        scripts.sort_by_cached_key(|p| self.rank(&p.to_string_lossy()));
    }
}

/// All `*.sh` files under `dir`, absolute, in file-name order.
///
/// A missing or unreadable directory yields no scripts.
pub fn discover_scripts(dir: &Path) -> Vec<PathBuf> {
    let root = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
    if !root.exists() {
        warn!(path = %root.display(), "no execution scripts found");
        return Vec::new();
    }

    let mut scripts = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        match entry {
            Ok(entry) => {
                let is_script = entry.file_type().is_file()
                    && entry.file_name().to_string_lossy().ends_with(".sh");
                if is_script {
                    scripts.push(entry.into_path());
                }
            }
            Err(e) => warn!(path = %root.display(), error = %e, "skipping unreadable entry"),
        }
    }
    scripts
}

/// What happened to each command of a playbook run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybookOutcome {
    /// Commands in the order they were run.
    pub executed: Vec<String>,
    pub succeeded: usize,
    pub failed: usize,
    /// Not run because an earlier command failed.
    pub skipped: usize,
}

impl PlaybookOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Await one command, folding every failure mode into `false`.
async fn run_one<F>(command: &str, execution: F) -> bool
where
    F: Future<Output = ExecResult<CommandOutput>>,
{
    info!(command, "Running command");
    match execution.await {
        Ok(output) => {
            let verdict = if output.success() { "SUCCESS" } else { "ERROR" };
            info!(
                command,
                elapsed_ms = output.elapsed.as_millis() as u64,
                "Command finished with exit code {} - {}",
                output.exit_code,
                verdict
            );
            output.success()
        }
        Err(e) => {
            error!(command, error = %e, "unable to run command");
            false
        }
    }
}

/// Gating playbook over a scripts directory.
#[derive(Debug, Clone)]
pub struct ScriptPlaybook {
    dir: PathBuf,
    priority: PriorityList,
    executor: CommandExecutor,
    timeout: Duration,
}

impl ScriptPlaybook {
    pub fn new(dir: impl Into<PathBuf>, priority: &str, executor: CommandExecutor) -> Self {
        Self {
            dir: dir.into(),
            priority: PriorityList::parse(priority),
            executor,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Discovered scripts in execution order.
    pub fn scripts(&self) -> Vec<PathBuf> {
        let mut scripts = discover_scripts(&self.dir);
        self.priority.order(&mut scripts);
        scripts
    }

    /// Run scripts in order until one fails. Success iff all exited 0.
    pub async fn run(&self, heartbeat: Heartbeat) -> PlaybookOutcome {
        let scripts = self.scripts();
        let mut outcome = PlaybookOutcome::default();
        info!(path = %self.dir.display(), count = scripts.len(), "running scripts");

        for (i, script) in scripts.iter().enumerate() {
            let command = script.to_string_lossy().into_owned();
            let execution = self
                .executor
                .execute_script(script, heartbeat.clone(), self.timeout);
            let ok = run_one(&command, execution).await;
            outcome.executed.push(command);
            if ok {
                outcome.succeeded += 1;
            } else {
                outcome.failed += 1;
                outcome.skipped = scripts.len() - i - 1;
                if outcome.skipped > 0 {
                    warn!(skipped = outcome.skipped, "script failed, skipping the rest");
                }
                break;
            }
        }
        outcome
    }
}

/// Non-gating playbook over a static list of command templates.
#[derive(Debug, Clone)]
pub struct CommandPlaybook {
    commands: Vec<String>,
    renderer: MacroRenderer,
    executor: CommandExecutor,
    timeout: Duration,
}

impl CommandPlaybook {
    pub fn new(commands: Vec<String>, renderer: MacroRenderer, executor: CommandExecutor) -> Self {
        Self {
            commands,
            renderer,
            executor,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render and run every command, regardless of earlier failures.
    pub async fn run(
        &self,
        trigger: Option<&dyn MacroFields>,
        heartbeat: Heartbeat,
    ) -> PlaybookOutcome {
        let mut outcome = PlaybookOutcome::default();
        for template in &self.commands {
            let command = self.renderer.render_opt(template, trigger);
            let execution = self.executor.execute(&command, heartbeat.clone(), self.timeout);
            if run_one(&command, execution).await {
                outcome.succeeded += 1;
            } else {
                outcome.failed += 1;
            }
            outcome.executed.push(command);
        }
        outcome
    }
}
