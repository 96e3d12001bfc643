//! Domain types shared across lifeline crates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TriggerParseError;

/// Lifecycle transition string for instances entering service.
pub const LAUNCHING_TRANSITION: &str = "autoscaling:EC2_INSTANCE_LAUNCHING";
/// Lifecycle transition string for instances leaving service.
pub const TERMINATING_TRANSITION: &str = "autoscaling:EC2_INSTANCE_TERMINATING";

/// The autoscaling transition a lifecycle notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    Launching,
    Terminating,
    Unknown,
}

impl Transition {
    /// Classify a raw `LifecycleTransition` value.
    pub fn parse(raw: &str) -> Self {
        match raw {
            LAUNCHING_TRANSITION => Transition::Launching,
            TERMINATING_TRANSITION => Transition::Terminating,
            _ => Transition::Unknown,
        }
    }

    /// The transition string the autoscaling API uses, if there is one.
    pub fn as_hook_transition(&self) -> Option<&'static str> {
        match self {
            Transition::Launching => Some(LAUNCHING_TRANSITION),
            Transition::Terminating => Some(TERMINATING_TRANSITION),
            Transition::Unknown => None,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Launching => f.write_str("LAUNCHING"),
            Transition::Terminating => f.write_str("TERMINATING"),
            Transition::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Fields carried by every lifecycle hook notification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecycleNotice {
    pub instance_id: String,
    pub group_name: String,
    pub hook_name: String,
    pub action_token: Option<String>,
    /// Raw transition string as delivered.
    pub transition: String,
}

/// A parsed trigger delivered through the instance's queue.
///
/// One event corresponds to exactly one queue message. Events are never
/// persisted; they are dropped once the orchestrator has looked at them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    Launching(LifecycleNotice),
    Terminating(LifecycleNotice),
    Unknown(LifecycleNotice),
}

/// Wire shape of the queue message body: a topic notification wrapping
/// the lifecycle payload as a JSON string.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Message")]
    message: String,
}

/// Wire shape of the lifecycle payload. Unknown fields are ignored.
#[derive(Deserialize)]
struct RawNotice {
    #[serde(rename = "EC2InstanceId", alias = "ec2InstanceId", default)]
    instance_id: String,
    #[serde(rename = "AutoScalingGroupName", alias = "autoScalingGroupName", default)]
    group_name: String,
    #[serde(rename = "LifecycleHookName", alias = "lifecycleHookName", default)]
    hook_name: String,
    #[serde(rename = "LifecycleActionToken", alias = "lifecycleActionToken", default)]
    action_token: Option<String>,
    #[serde(rename = "LifecycleTransition", alias = "lifecycleTransition", default)]
    transition: String,
}

impl TriggerEvent {
    /// Wrap a notice in the variant matching its transition.
    pub fn from_notice(notice: LifecycleNotice) -> Self {
        match Transition::parse(&notice.transition) {
            Transition::Launching => TriggerEvent::Launching(notice),
            Transition::Terminating => TriggerEvent::Terminating(notice),
            Transition::Unknown => TriggerEvent::Unknown(notice),
        }
    }

    /// Parse a raw queue message body.
    ///
    /// The body is a notification envelope whose `Message` field holds
    /// the lifecycle payload as a JSON string.
    pub fn parse(body: &str) -> Result<Self, TriggerParseError> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|e| TriggerParseError::Envelope(e.to_string()))?;
        let raw: RawNotice = serde_json::from_str(&envelope.message)
            .map_err(|e| TriggerParseError::Payload(e.to_string()))?;

        Ok(Self::from_notice(LifecycleNotice {
            instance_id: raw.instance_id,
            group_name: raw.group_name,
            hook_name: raw.hook_name,
            action_token: raw.action_token.filter(|t| !t.is_empty()),
            transition: raw.transition,
        }))
    }

    pub fn transition(&self) -> Transition {
        match self {
            TriggerEvent::Launching(_) => Transition::Launching,
            TriggerEvent::Terminating(_) => Transition::Terminating,
            TriggerEvent::Unknown(_) => Transition::Unknown,
        }
    }

    pub fn notice(&self) -> &LifecycleNotice {
        match self {
            TriggerEvent::Launching(n) | TriggerEvent::Terminating(n) | TriggerEvent::Unknown(n) => n,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.notice().instance_id
    }

    pub fn group_name(&self) -> &str {
        &self.notice().group_name
    }

    pub fn hook_name(&self) -> &str {
        &self.notice().hook_name
    }

    pub fn action_token(&self) -> Option<&str> {
        self.notice().action_token.as_deref()
    }

    /// Whether this is a termination addressed to `instance_id`.
    pub fn is_termination_of(&self, instance_id: &str) -> bool {
        matches!(self, TriggerEvent::Terminating(_)) && self.instance_id() == instance_id
    }

    /// The lifecycle hook this event is blocking.
    pub fn hook_ref(&self) -> HookRef {
        let n = self.notice();
        HookRef {
            instance_id: n.instance_id.clone(),
            group_name: n.group_name.clone(),
            hook_name: n.hook_name.clone(),
            action_token: n.action_token.clone(),
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.notice();
        write!(
            f,
            "{} instance={} group={} hook={}",
            self.transition(),
            n.instance_id,
            n.group_name,
            n.hook_name
        )
    }
}

/// Named values that can be substituted into command templates.
///
/// A field named `foo` fills the `TRIGGER_FOO_MACRO` placeholder.
pub trait MacroFields: Sync {
    fn macro_fields(&self) -> Vec<(&'static str, String)>;
}

impl MacroFields for TriggerEvent {
    fn macro_fields(&self) -> Vec<(&'static str, String)> {
        let n = self.notice();
        vec![
            ("ec2InstanceId", n.instance_id.clone()),
            ("autoScalingGroupName", n.group_name.clone()),
            ("lifecycleHookName", n.hook_name.clone()),
            ("lifecycleActionToken", n.action_token.clone().unwrap_or_default()),
            ("lifecycleTransition", n.transition.clone()),
            ("type", self.transition().to_string()),
        ]
    }
}

/// Identifies the pending autoscaling transition this instance is blocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRef {
    pub instance_id: String,
    pub group_name: String,
    pub hook_name: String,
    pub action_token: Option<String>,
}

impl fmt::Display for HookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.group_name, self.hook_name, self.instance_id
        )
    }
}

/// Result reported when completing a lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleOutcome {
    Continue,
    Abandon,
}

impl LifecycleOutcome {
    pub fn from_success(successful: bool) -> Self {
        if successful {
            LifecycleOutcome::Continue
        } else {
            LifecycleOutcome::Abandon
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Continue => "CONTINUE",
            LifecycleOutcome::Abandon => "ABANDON",
        }
    }
}

impl fmt::Display for LifecycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
