//! lifeline-lifecycle — talking to the autoscaling group's lifecycle hooks.
//!
//! [`LifecycleController`] extends a pending hook with heartbeats and
//! completes it with CONTINUE or ABANDON. [`resolve_hook`] finds the
//! launch hook for this instance at startup. Both tolerate the instance
//! not being under lifecycle management at all.

pub mod api;
pub mod controller;
pub mod error;
pub mod resolve;

pub use api::{AutoScalingApi, MemoryAutoScaling, NoopAutoScaling};
pub use controller::{Completion, CompletionRetry, LifecycleController};
pub use error::{LifecycleError, LifecycleResult};
pub use resolve::resolve_hook;
