//! Drives the real `lifelined` binary with AWS disabled.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

fn lifelined() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lifelined"));
    cmd.env_remove("LIFELINE_APP_CONFIG")
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    cmd
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("lifeline.toml");
    std::fs::write(&path, body).unwrap();
    path.display().to_string()
}

fn wait_for_exit(child: &mut Child, within: Duration) -> std::process::ExitStatus {
    let deadline = Instant::now() + within;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            child.kill().ok();
            panic!("lifelined did not exit within {within:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn missing_config_without_wait_fails() {
    let dir = tempfile::tempdir().unwrap();
    let absent = dir.path().join("absent.toml");
    let out = lifelined()
        .args(["--no-wait", "--config"])
        .arg(&absent)
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("failed to read config file"), "{stderr}");
}

#[test]
fn missing_topic_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[app]\nname = \"checkout\"\n");
    let out = lifelined()
        .args(["--no-wait", "--config", &config, "agent"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("queue.topic"), "{stderr}");
}

#[test]
fn local_agent_records_startup_and_stops_on_sigterm() {
    let dir = tempfile::tempdir().unwrap();
    let persist = dir.path().join("startup-result");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[queue]
topic = "lifecycle-events"
wait_time = "1s"

[startup]
mode = "none"
persist_file = "{}"

[shutdown]
scripts_path = "{}"
"#,
            persist.display(),
            dir.path().join("shutdown.d").display(),
        ),
    );

    let mut child = lifelined()
        .args(["--no-wait", "--config", &config, "agent"])
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while std::fs::read_to_string(&persist).ok().as_deref() != Some("true") {
        if Instant::now() > deadline {
            child.kill().ok();
            panic!("startup result was never recorded");
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
    kill(pid, Signal::SIGTERM).unwrap();
    let status = wait_for_exit(&mut child, Duration::from_secs(10));
    assert!(status.success(), "exit status {status:?}");
}
