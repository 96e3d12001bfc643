use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exceeded its {timeout:?} timeout and was killed")]
    TimedOut { command: String, timeout: Duration },

    #[error("failed to wait on child process: {0}")]
    Wait(#[from] std::io::Error),
}

pub type ExecResult<T> = Result<T, ExecError>;
