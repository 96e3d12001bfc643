//! lifeline-exec — running operator playbooks.
//!
//! ```text
//! ScriptPlaybook / CommandPlaybook
//!   ├── PriorityList      (orders discovered *.sh files)
//!   ├── MacroRenderer     (HOSTNAME_MACRO, REGION_MACRO, TRIGGER_<FIELD>_MACRO)
//!   └── CommandExecutor   (bash -c, hard timeout, heartbeat while running)
//! ```

pub mod error;
pub mod executor;
pub mod macros;
pub mod playbook;

pub use error::{ExecError, ExecResult};
pub use executor::{CommandExecutor, CommandOutput};
pub use macros::MacroRenderer;
pub use playbook::{
    CommandPlaybook, DEFAULT_COMMAND_TIMEOUT, PlaybookOutcome, PriorityList, ScriptPlaybook,
    discover_scripts,
};
