//! Container runtime interface.
//!
//! The scheduler never talks to a container engine directly. Everything it
//! needs (discovery, lifecycle events and the primitives behind each action)
//! goes through [`ContainerRuntime`]. [`DockerRuntime`] implements it for the
//! Docker Engine API; [`crate::testing::MockRuntime`] implements it in memory.

mod docker;

pub use docker::DockerRuntime;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::ContainerId;

/// Errors reported by a container runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// Could not reach the runtime.
    #[error("connection error: {0}")]
    Connection(String),

    /// The container or exec session does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime rejected or failed the request.
    #[error("runtime API error: {0}")]
    Api(String),

    /// A streaming response (events, exec output) failed.
    #[error("stream error: {0}")]
    Stream(String),
}

/// A container and its labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub labels: HashMap<String, String>,
}

impl ContainerInfo {
    pub fn new(id: impl Into<ContainerId>, labels: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            labels,
        }
    }
}

/// Label filter restricting discovery and events to opted-in containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFilter {
    /// `key` or `key=value`.
    pub label: String,
}

impl ContainerFilter {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// Whether a label set satisfies the filter.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self.label.split_once('=') {
            Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
            None => labels.contains_key(&self.label),
        }
    }
}

impl Default for ContainerFilter {
    fn default() -> Self {
        Self::label("cronify=true")
    }
}

/// Lifecycle event kinds the orchestrator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEventAction {
    Create,
    Update,
    Destroy,
    Other(String),
}

impl ContainerEventAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "create" => ContainerEventAction::Create,
            "update" => ContainerEventAction::Update,
            "destroy" => ContainerEventAction::Destroy,
            other => ContainerEventAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerEventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerEventAction::Create => f.write_str("create"),
            ContainerEventAction::Update => f.write_str("update"),
            ContainerEventAction::Destroy => f.write_str("destroy"),
            ContainerEventAction::Other(other) => f.write_str(other),
        }
    }
}

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub action: ContainerEventAction,
    pub container: ContainerId,
}

/// State of an exec session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    pub running: bool,
    /// Exit code, once the session has finished.
    pub exit_code: Option<i64>,
}

/// Which stream a piece of exec output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// Raw output of a TTY session, where the streams are not separated.
    Console,
}

/// A demultiplexed piece of exec output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: Vec<u8>,
}

/// Attached output of a running exec session.
pub type ExecOutput = BoxStream<'static, Result<OutputChunk, RuntimeError>>;

/// Stream of container lifecycle events.
pub type EventStream = BoxStream<'static, Result<ContainerEvent, RuntimeError>>;

/// Operations the scheduler needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List all containers (running or not) matching the filter.
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerInfo>, RuntimeError>;

    /// Get a single container's labels.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, RuntimeError>;

    /// Subscribe to create/update/destroy events of matching containers.
    ///
    /// The stream ends or yields an error when the subscription breaks.
    fn watch_events(&self, filter: &ContainerFilter) -> EventStream;

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Stop a container, killing it after `grace` (runtime default when `None`).
    async fn stop_container(
        &self,
        id: &ContainerId,
        grace: Option<Duration>,
    ) -> Result<(), RuntimeError>;

    /// Restart a container, killing it after `grace` (runtime default when `None`).
    async fn restart_container(
        &self,
        id: &ContainerId,
        grace: Option<Duration>,
    ) -> Result<(), RuntimeError>;

    /// Send a signal (`SIGHUP`, `9`, ...) to the container's main process.
    async fn kill_container(&self, id: &ContainerId, signal: &str) -> Result<(), RuntimeError>;

    /// Create an exec session with stdout and stderr attached. Returns its id.
    async fn create_exec(
        &self,
        id: &ContainerId,
        command: &[String],
    ) -> Result<String, RuntimeError>;

    /// Attach to and start an exec session, returning its demultiplexed output.
    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput, RuntimeError>;

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus, RuntimeError>;
}
