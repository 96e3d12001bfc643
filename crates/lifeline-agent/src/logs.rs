//! Shipping local log files to remote storage after startup/shutdown.
//!
//! Each configured path is first copied into a fresh temporary directory
//! so files still being appended to are not uploaded mid-write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{AgentError, AgentResult};

/// Upload sequence number shared by every shipper in the process.
static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

#[async_trait]
pub trait LogUploader: Send + Sync {
    /// Upload the directory `local` under the remote prefix `remote`.
    async fn upload(&self, local: &Path, remote: &str) -> AgentResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopLogUploader;

#[async_trait]
impl LogUploader for NoopLogUploader {
    async fn upload(&self, _local: &Path, remote: &str) -> AgentResult<()> {
        debug!(remote, "log upload disabled");
        Ok(())
    }
}

/// Records the remote key and content of every uploaded file.
#[derive(Debug, Default)]
pub struct RecordingLogUploader {
    uploads: Mutex<Vec<(String, String)>>,
}

impl RecordingLogUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(remote key, file content)` pairs.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LogUploader for RecordingLogUploader {
    async fn upload(&self, local: &Path, remote: &str) -> AgentResult<()> {
        let mut recorded = Vec::new();
        for (file, key) in remote_keys(local, remote) {
            let content = std::fs::read_to_string(&file).unwrap_or_default();
            recorded.push((key, content));
        }
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(recorded);
        Ok(())
    }
}

/// Every file under `local` paired with its key under `remote`.
pub fn remote_keys(local: &Path, remote: &str) -> Vec<(PathBuf, String)> {
    WalkDir::new(local)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(local).ok()?.to_string_lossy().into_owned();
            Some((e.path().to_path_buf(), format!("{remote}/{rel}")))
        })
        .collect()
}

pub struct LogShipper {
    uploader: Arc<dyn LogUploader>,
    app_name: String,
    region: String,
    hostname: String,
    paths: Vec<PathBuf>,
}

impl LogShipper {
    pub fn new(
        uploader: Arc<dyn LogUploader>,
        app_name: impl Into<String>,
        region: impl Into<String>,
        hostname: impl Into<String>,
        paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            uploader,
            app_name: app_name.into(),
            region: region.into(),
            hostname: hostname.into(),
            paths,
        }
    }

    /// A shipper with nothing to ship.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopLogUploader), "", "", "", Vec::new())
    }

    /// e.g. `checkout/log/startup_successful/us-east-1/web-01`
    pub fn remote_prefix(&self, operation: &str, successful: bool) -> String {
        let status = if successful { "successful" } else { "failed" };
        format!(
            "{}/log/{}_{}/{}/{}",
            self.app_name, operation, status, self.region, self.hostname
        )
    }

    /// Upload every configured path. Errors are logged, never returned.
    pub async fn ship(&self, operation: &str, successful: bool) {
        if self.paths.is_empty() {
            return;
        }
        let prefix = self.remote_prefix(operation, successful);
        info!(operation, prefix = %prefix, "uploading logs");

        for path in &self.paths {
            if !path.exists() {
                warn!(path = %path.display(), "log path does not exist, skipping");
                continue;
            }
            let seq = UPLOAD_SEQ.fetch_add(1, Ordering::SeqCst);
            let remote = format!("{prefix}/{seq}");
            if let Err(e) = self.ship_one(path, &remote).await {
                error!(path = %path.display(), error = %e, "failed to upload log");
            }
        }
    }

    async fn ship_one(&self, path: &Path, remote: &str) -> AgentResult<()> {
        let staging = tempfile::Builder::new()
            .prefix("lifeline-logs-")
            .tempdir()
            .map_err(|e| AgentError::Upload(format!("staging dir: {e}")))?;
        copy_into(path, staging.path())
            .map_err(|e| AgentError::Upload(format!("copy {}: {e}", path.display())))?;
        self.uploader.upload(staging.path(), remote).await
    }
}

/// Copy a file into `dest`, or a directory's contents recursively.
fn copy_into(source: &Path, dest: &Path) -> std::io::Result<()> {
    if source.is_file() {
        let name = source.file_name().unwrap_or(source.as_os_str());
        std::fs::copy(source, dest.join(name))?;
        return Ok(());
    }
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipper(uploader: &Arc<RecordingLogUploader>, paths: Vec<PathBuf>) -> LogShipper {
        LogShipper::new(uploader.clone(), "checkout", "us-east-1", "web-01", paths)
    }

    #[test]
    fn prefix_layout() {
        let up = Arc::new(RecordingLogUploader::new());
        let s = shipper(&up, vec![]);
        assert_eq!(
            s.remote_prefix("startup", true),
            "checkout/log/startup_successful/us-east-1/web-01"
        );
        assert_eq!(
            s.remote_prefix("shutdown", false),
            "checkout/log/shutdown_failed/us-east-1/web-01"
        );
    }

    #[tokio::test]
    async fn ships_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.log");
        std::fs::write(&file, "line 1\n").unwrap();
        let logdir = dir.path().join("more");
        std::fs::create_dir_all(logdir.join("sub")).unwrap();
        std::fs::write(logdir.join("sub/inner.log"), "inner").unwrap();

        let up = Arc::new(RecordingLogUploader::new());
        shipper(&up, vec![file, logdir, dir.path().join("missing.log")])
            .ship("shutdown", true)
            .await;

        let uploads = up.uploads();
        assert_eq!(uploads.len(), 2);
        let prefix = "checkout/log/shutdown_successful/us-east-1/web-01/";
        assert!(uploads[0].0.starts_with(prefix));
        assert!(uploads[0].0.ends_with("/app.log"));
        assert_eq!(uploads[0].1, "line 1\n");
        assert!(uploads[1].0.ends_with("/sub/inner.log"));
        assert_eq!(uploads[1].1, "inner");
    }

    #[tokio::test]
    async fn nothing_configured_nothing_uploaded() {
        let up = Arc::new(RecordingLogUploader::new());
        shipper(&up, vec![]).ship("startup", false).await;
        assert!(up.uploads().is_empty());
    }
}
