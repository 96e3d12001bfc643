use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue already exists: {0}")]
    AlreadyExists(String),

    #[error("queue does not exist: {0}")]
    QueueMissing(String),

    #[error("channel has already been released")]
    Released,

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("queue transport error: {0}")]
    Transport(String),
}

impl QueueError {
    /// The channel's queue was deleted out from under us.
    pub fn is_queue_missing(&self) -> bool {
        matches!(self, QueueError::QueueMissing(_))
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
