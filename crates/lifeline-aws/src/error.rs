use thiserror::Error;

#[derive(Debug, Error)]
pub enum AwsError {
    #[error("instance metadata request {path} failed: {reason}")]
    Metadata { path: String, reason: String },
}

pub type AwsResult<T> = Result<T, AwsError>;

/// Error codes the queue service uses for a deleted or unknown queue.
const QUEUE_MISSING_CODES: &[&str] = &[
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "NonExistentQueue",
];

const QUEUE_EXISTS_CODES: &[&str] = &["QueueAlreadyExists", "QueueNameExists"];

pub fn is_queue_missing_code(code: Option<&str>) -> bool {
    code.is_some_and(|c| QUEUE_MISSING_CODES.contains(&c))
}

pub fn is_queue_exists_code(code: Option<&str>) -> bool {
    code.is_some_and(|c| QUEUE_EXISTS_CODES.contains(&c))
}
