//! lifeline-queue — the per-instance trigger channel.
//!
//! A channel is one queue named after the instance plus its subscription
//! to the shared lifecycle topic. [`ChannelManager`] provisions and tears
//! it down; [`TriggerWatcher`] long-polls it on a background task and
//! hands parsed [`TriggerEvent`](lifeline_core::TriggerEvent)s to the
//! orchestrator through a bounded channel.
//!
//! Cloud access goes through the [`QueueBackend`] and [`TopicBackend`]
//! traits. [`MemoryQueue`] implements both for tests; [`NoopQueue`] is
//! used when cloud integration is disabled.

pub mod backend;
pub mod channel;
pub mod error;
pub mod memory;
pub mod policy;
pub mod watcher;

pub use backend::{NoopQueue, QueueAttributes, QueueBackend, RawMessage, TopicBackend};
pub use channel::{ChannelManager, Subscription};
pub use error::{QueueError, QueueResult};
pub use memory::{MemoryQueue, MemoryQueueStats};
pub use policy::access_policy;
pub use watcher::{TriggerStream, TriggerWatcher, WatcherSettings, backoff_delay};
