//! Container actions.
//!
//! An [`ActionConfig`] is the fully resolved description of one runtime call:
//! which kind of action, against which container, with which parameters. It is
//! built once from labels and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::types::ContainerId;

/// Signal sent by a kill action when no `signal` label is given.
pub const DEFAULT_KILL_SIGNAL: &str = "SIGKILL";

/// The lifecycle operation an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Send a signal to the container's main process.
    Kill,
    /// Start the container.
    Start,
    /// Stop the container.
    Stop,
    /// Restart the container.
    Restart,
    /// Run a command inside the container.
    Exec,
}

impl ActionKind {
    /// Resolve a `type` label value. Matching is case-insensitive and
    /// `signal` is accepted as an alias for `kill`.
    pub fn from_alias(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "kill" | "signal" => Some(ActionKind::Kill),
            "exec" => Some(ActionKind::Exec),
            "start" => Some(ActionKind::Start),
            "stop" => Some(ActionKind::Stop),
            "restart" => Some(ActionKind::Restart),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Kill => "kill",
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Restart => "restart",
            ActionKind::Exec => "exec",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for one action invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Kind of action; `None` until a `type` label sets it.
    pub kind: Option<ActionKind>,
    /// Container the action is performed against.
    pub container: ContainerId,
    /// Command for exec actions.
    pub command: Vec<String>,
    /// Signal for kill actions.
    pub signal: Option<String>,
    /// Wait for the started container to finish. Parsed but not enforced yet.
    pub wait: bool,
    /// Per-action timeout; zero means no timeout.
    pub timeout: Duration,
}

impl ActionConfig {
    /// Create an untyped action targeting the given container.
    pub fn new(container: impl Into<ContainerId>) -> Self {
        Self {
            container: container.into(),
            ..Self::default()
        }
    }

    /// Builder: set the action kind.
    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Builder: set the exec command.
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the kill signal.
    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    /// Builder: set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// The signal a kill action sends.
    pub fn signal_or_default(&self) -> &str {
        match self.signal.as_deref() {
            Some(signal) if !signal.is_empty() => signal,
            _ => DEFAULT_KILL_SIGNAL,
        }
    }
}
