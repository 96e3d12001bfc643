use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to persist startup result to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind signal server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Queue(#[from] lifeline_queue::QueueError),

    #[error("log upload failed: {0}")]
    Upload(String),

    #[error("metric emission failed: {0}")]
    Metrics(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
