//! Durable record of the startup outcome.
//!
//! The file holds `true` or `false`. A missing file, or anything else in
//! it, means startup has not run yet on this instance.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupResult {
    Successful,
    Failed,
    NotRun,
}

impl StartupResult {
    pub fn from_content(content: &str) -> Self {
        match content.trim() {
            "true" => StartupResult::Successful,
            "false" => StartupResult::Failed,
            _ => StartupResult::NotRun,
        }
    }

    fn encode(successful: bool) -> &'static str {
        if successful { "true" } else { "false" }
    }
}

#[derive(Debug, Clone)]
pub struct StartupResultStore {
    path: PathBuf,
}

impl StartupResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> StartupResult {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let result = StartupResult::from_content(&content);
                debug!(path = %self.path.display(), ?result, "read startup result");
                result
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StartupResult::NotRun,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable startup result, treating as not run");
                StartupResult::NotRun
            }
        }
    }

    /// Replace the record atomically: write a sibling temp file, then rename.
    pub fn write(&self, successful: bool) -> AgentResult<()> {
        let err = |source| AgentError::Persist {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(err)?;
        tmp.write_all(StartupResult::encode(successful).as_bytes())
            .map_err(err)?;
        tmp.as_file().sync_all().map_err(err)?;
        tmp.persist(&self.path).map_err(|e| err(e.error))?;
        Ok(())
    }
}
