//! lifeline-core — shared types for the lifeline fleet lifecycle agent.
//!
//! Everything the other crates agree on lives here: the parsed trigger
//! events delivered through the instance's queue, lifecycle hook
//! references, the TOML configuration, and the heartbeat callback that
//! long-running work uses to keep an autoscaling lifecycle hook alive.

pub mod arn;
pub mod config;
pub mod duration;
pub mod error;
pub mod heartbeat;
pub mod host;
pub mod types;

pub use arn::{ArnScope, arn_for, is_arn};
pub use config::LifelineConfig;
pub use error::{ConfigError, TriggerParseError};
pub use heartbeat::{BoxFuture, Heartbeat, HeartbeatTicker, heartbeat_fn, noop_heartbeat};
pub use host::hostname;
pub use types::*;
