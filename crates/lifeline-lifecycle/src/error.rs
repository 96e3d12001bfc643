use thiserror::Error;

const NO_ACTIVE_ACTION: &str = "no active lifecycle action";

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The hook already resolved (e.g. timed out); retrying cannot help.
    #[error("no active lifecycle action: {0}")]
    NoActiveAction(String),

    #[error("autoscaling api error: {0}")]
    Api(String),
}

impl LifecycleError {
    /// Whether the service says there is no pending action for this hook.
    ///
    /// Also matches backends that only report it in the message text.
    pub fn is_no_active_action(&self) -> bool {
        match self {
            LifecycleError::NoActiveAction(_) => true,
            LifecycleError::Api(msg) => msg.to_ascii_lowercase().contains(NO_ACTIVE_ACTION),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
