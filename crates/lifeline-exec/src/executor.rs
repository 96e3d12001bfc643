//! Command executor. Runs one shell command under a hard timeout.
//!
//! The child runs in its own process group so a timeout, or dropping the
//! future, kills everything the command spawned. While it is alive the executor polls liveness on
//! a short interval and fires the heartbeat on a coarser one.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use lifeline_core::{Heartbeat, HeartbeatTicker};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ExecError, ExecResult};

/// How long to wait for output pipes to close after the child exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code, captured output, and wall time of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self {
            shell: "bash".to_string(),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(60),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Run `command` through `<shell> -c`.
    ///
    /// A non-zero exit is not an error; check [`CommandOutput::success`].
    /// Returns `TimedOut` after killing the process group if the command
    /// outlives `timeout`.
    pub async fn execute(
        &self,
        command: &str,
        heartbeat: Heartbeat,
        timeout: Duration,
    ) -> ExecResult<CommandOutput> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        self.run(cmd, command, heartbeat, timeout).await
    }

    /// Run a script file with the shell. The path is passed as its own
    /// argument, never through `-c`.
    pub async fn execute_script(
        &self,
        script: &Path,
        heartbeat: Heartbeat,
        timeout: Duration,
    ) -> ExecResult<CommandOutput> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(script);
        self.run(cmd, &script.to_string_lossy(), heartbeat, timeout).await
    }

    async fn run(
        &self,
        mut cmd: Command,
        command: &str,
        heartbeat: Heartbeat,
        timeout: Duration,
    ) -> ExecResult<CommandOutput> {
        let start = Instant::now();

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?;
        let mut group = ProcessGroup::of(&child);

        debug!(command, pid = ?child.id(), "spawned command");

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let ticker = HeartbeatTicker::every(heartbeat, self.heartbeat_interval);
        let waited = self.wait_with_deadline(&mut child, start + timeout).await;
        if let Ok(Some(_)) = waited {
            // Normal exit: background children outlive the command.
            group.disarm();
        }
        ticker.stop().await;

        let status = match waited {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                warn!(command, ?timeout, "command timed out, killing process group");
                kill_tree(&mut child, &mut group).await;
                None
            }
            Err(e) => {
                kill_tree(&mut child, &mut group).await;
                drain(stdout).await;
                drain(stderr).await;
                return Err(ExecError::Wait(e));
            }
        };

        let stdout = drain(stdout).await;
        let stderr = drain(stderr).await;
        log_outputs(command, &stdout, &stderr);

        match status {
            Some(status) => Ok(CommandOutput {
                exit_code: exit_code(status),
                stdout,
                stderr,
                elapsed: start.elapsed(),
            }),
            None => Err(ExecError::TimedOut {
                command: command.to_string(),
                timeout,
            }),
        }
    }

    /// Poll until the child exits (`Some`) or the deadline passes (`None`).
    async fn wait_with_deadline(
        &self,
        child: &mut Child,
        deadline: Instant,
    ) -> std::io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

fn spawn_reader<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "output pipe read failed");
        }
        buf
    })
}

/// Collect a reader's output. Grandchildren that kept the pipe open are
/// not waited on past [`OUTPUT_DRAIN_TIMEOUT`].
async fn drain(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut handle) = reader else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Ok(Err(e)) => {
            debug!(error = %e, "output reader task failed");
            String::new()
        }
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

/// The child's process group. Dropping it while armed SIGKILLs the whole
/// group, so a cancelled `execute` leaves nothing behind.
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self {
            pgid: child
                .id()
                .and_then(|pid| i32::try_from(pid).ok())
                .map(Pid::from_raw),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                debug!(pgid = pgid.as_raw(), error = %e, "process group kill failed");
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn kill_tree(child: &mut Child, group: &mut ProcessGroup) {
    group.kill();
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed");
    }
    if let Err(e) = child.wait().await {
        error!(error = %e, "failed to reap killed command");
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

fn log_outputs(command: &str, stdout: &str, stderr: &str) {
    if !stdout.is_empty() {
        info!(command, "Command output:\n>>>>>\n{}\n<<<<<", stdout);
    }
    if !stderr.is_empty() {
        error!(command, "Command error:\n>>>>>\n{}\n<<<<<", stderr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::{heartbeat_fn, noop_heartbeat};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> CommandExecutor {
        CommandExecutor::new()
            .with_shell("sh")
            .with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let out = fast()
            .execute("echo hello; echo oops >&2; exit 3", noop_heartbeat(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "oops");
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let out = fast()
            .execute("true", noop_heartbeat(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.stdout.is_empty());
    }

    #[tokio::test]
    async fn timeout_kills_command() {
        let started = std::time::Instant::now();
        let err = fast()
            .execute("sleep 30", noop_heartbeat(), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let cmd = format!("(sleep 1; touch {}) & sleep 30", marker.display());
        let err = fast()
            .execute(&cmd, noop_heartbeat(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child survived the timeout");
    }

    #[tokio::test]
    async fn cancelled_execute_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let cmd = format!("(sleep 1; touch {}) & wait", marker.display());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(300),
            fast().execute(&cmd, noop_heartbeat(), Duration::from_secs(30)),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(!marker.exists(), "background child survived cancellation");
    }

    #[tokio::test]
    async fn script_path_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("my scripts");
        std::fs::create_dir(&scripts).unwrap();
        let script = scripts.join("hello world.sh");
        std::fs::write(&script, "echo \"$0\" ran\n").unwrap();

        let out = fast()
            .execute_script(&script, noop_heartbeat(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, format!("{} ran", script.display()));
    }

    #[tokio::test]
    async fn heartbeats_while_running() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let hb = heartbeat_fn(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        fast()
            .with_heartbeat_interval(Duration::from_millis(100))
            .execute("sleep 0.55", hb, Duration::from_secs(10))
            .await
            .unwrap();

        let beats = count.load(Ordering::SeqCst);
        assert!((3..=6).contains(&beats), "unexpected heartbeat count {beats}");
    }

    #[tokio::test]
    async fn no_heartbeat_for_quick_commands() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let hb = heartbeat_fn(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        fast().execute("true", hb, Duration::from_secs(10)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_shell_is_spawn_error() {
        let err = CommandExecutor::new()
            .with_shell("/nonexistent/shell")
            .execute("true", noop_heartbeat(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn killed_by_signal_maps_to_128_plus() {
        let out = fast()
            .execute("kill -9 $$", noop_heartbeat(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 137);
    }
}
