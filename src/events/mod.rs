//! Lifecycle events and event handling.
//!
//! The scheduler reports every run, action outcome and scheduling failure as
//! an [`Event`] on the [`EventBus`]. Handlers registered on the bus receive
//! events in emission order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::action::ActionKind;
use crate::core::types::{ContainerId, RunId};
use crate::execution::ActionResult;

/// Where in a run an action executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPhase {
    /// The job's primary action.
    Primary,
    /// A success hook, with its index.
    OnSuccess(String),
    /// A failure hook, with its index.
    OnFailure(String),
}

impl fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionPhase::Primary => f.write_str("primary"),
            ActionPhase::OnSuccess(index) => write!(f, "success.{index}"),
            ActionPhase::OnFailure(index) => write!(f, "fail.{index}"),
        }
    }
}

/// Lifecycle events emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum Event {
    /// A run of a job has started.
    JobStarted {
        job: String,
        owner: ContainerId,
        run_id: RunId,
        timestamp: Instant,
    },

    /// An action finished successfully.
    ActionCompleted {
        job: String,
        owner: ContainerId,
        run_id: RunId,
        phase: ActionPhase,
        container: ContainerId,
        kind: Option<ActionKind>,
        exit_code: Option<i64>,
        duration: Duration,
        timestamp: Instant,
    },

    /// An action failed.
    ActionFailed {
        job: String,
        owner: ContainerId,
        run_id: RunId,
        phase: ActionPhase,
        container: ContainerId,
        kind: Option<ActionKind>,
        error: String,
        exit_code: Option<i64>,
        duration: Duration,
        timestamp: Instant,
    },

    /// A run has finished, hooks included.
    JobCompleted {
        job: String,
        owner: ContainerId,
        run_id: RunId,
        /// Outcome of the primary action.
        success: bool,
        duration: Duration,
        /// When the job runs next, `None` if it could not be rescheduled.
        next_run_at: Option<DateTime<Utc>>,
        timestamp: Instant,
    },

    /// A job's schedule could not be computed.
    ScheduleFailed {
        job: String,
        owner: ContainerId,
        error: String,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::JobStarted { timestamp, .. } => *timestamp,
            Event::ActionCompleted { timestamp, .. } => *timestamp,
            Event::ActionFailed { timestamp, .. } => *timestamp,
            Event::JobCompleted { timestamp, .. } => *timestamp,
            Event::ScheduleFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the job the event belongs to.
    pub fn job(&self) -> &str {
        match self {
            Event::JobStarted { job, .. }
            | Event::ActionCompleted { job, .. }
            | Event::ActionFailed { job, .. }
            | Event::JobCompleted { job, .. }
            | Event::ScheduleFailed { job, .. } => job,
        }
    }

    /// Container whose labels declared the job.
    pub fn owner(&self) -> &ContainerId {
        match self {
            Event::JobStarted { owner, .. }
            | Event::ActionCompleted { owner, .. }
            | Event::ActionFailed { owner, .. }
            | Event::JobCompleted { owner, .. }
            | Event::ScheduleFailed { owner, .. } => owner,
        }
    }

    /// Create a JobStarted event.
    pub fn job_started(job: impl Into<String>, owner: ContainerId, run_id: RunId) -> Self {
        Event::JobStarted {
            job: job.into(),
            owner,
            run_id,
            timestamp: Instant::now(),
        }
    }

    /// Create an ActionCompleted or ActionFailed event from an action's result.
    pub fn action_finished(
        job: impl Into<String>,
        owner: ContainerId,
        run_id: RunId,
        phase: ActionPhase,
        result: &ActionResult,
    ) -> Self {
        match &result.error {
            None => Event::ActionCompleted {
                job: job.into(),
                owner,
                run_id,
                phase,
                container: result.container.clone(),
                kind: result.kind,
                exit_code: result.exit_code,
                duration: result.duration,
                timestamp: Instant::now(),
            },
            Some(error) => Event::ActionFailed {
                job: job.into(),
                owner,
                run_id,
                phase,
                container: result.container.clone(),
                kind: result.kind,
                error: error.to_string(),
                exit_code: result.exit_code,
                duration: result.duration,
                timestamp: Instant::now(),
            },
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(
        job: impl Into<String>,
        owner: ContainerId,
        run_id: RunId,
        success: bool,
        duration: Duration,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Self {
        Event::JobCompleted {
            job: job.into(),
            owner,
            run_id,
            success,
            duration,
            next_run_at,
            timestamp: Instant::now(),
        }
    }

    /// Create a ScheduleFailed event.
    pub fn schedule_failed(
        job: impl Into<String>,
        owner: ContainerId,
        error: impl Into<String>,
    ) -> Self {
        Event::ScheduleFailed {
            job: job.into(),
            owner,
            error: error.into(),
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
