//! Action execution.
//!
//! The [`ActionExecutor`] turns an [`ActionConfig`] into container runtime
//! calls. Every action runs under a cancellation token derived from the
//! caller's and, when the action has a timeout, under a deadline.

use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::output::{OutputSink, StdoutSink};
use crate::core::action::{ActionConfig, ActionKind};
use crate::core::types::ContainerId;
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Default interval between exec status polls.
pub const DEFAULT_EXEC_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long a finished exec's output may take to reach the sink.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Reasons an action can fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The runtime call itself failed.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The exec'd command finished with a non-zero exit code.
    #[error("command exited with code {0}")]
    ExitCode(i64),

    /// The action did not finish within its timeout.
    #[error("action timed out after {0:?}")]
    Timeout(Duration),

    /// The action was aborted by shutdown.
    #[error("action cancelled")]
    Cancelled,

    /// No `type` label was given for the action.
    #[error("action has no type")]
    UnknownKind,

    /// An exec action without a command.
    #[error("exec action has no command")]
    MissingCommand,
}

/// Outcome of one action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Container the action targeted.
    pub container: ContainerId,
    /// Kind of action, if it had one.
    pub kind: Option<ActionKind>,
    /// Whether the action succeeded.
    pub success: bool,
    /// Error if the action failed.
    pub error: Option<ActionError>,
    /// Exit code of an exec action.
    pub exit_code: Option<i64>,
    /// Wall time spent on the action.
    pub duration: Duration,
}

impl ActionResult {
    /// Create a successful result.
    pub fn success(action: &ActionConfig, exit_code: Option<i64>, duration: Duration) -> Self {
        Self {
            container: action.container.clone(),
            kind: action.kind,
            success: true,
            error: None,
            exit_code,
            duration,
        }
    }

    /// Create a failed result.
    pub fn failure(action: &ActionConfig, error: ActionError, duration: Duration) -> Self {
        let exit_code = match error {
            ActionError::ExitCode(code) => Some(code),
            _ => None,
        };
        Self {
            container: action.container.clone(),
            kind: action.kind,
            success: false,
            error: Some(error),
            exit_code,
            duration,
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Executes actions against a container runtime.
#[derive(Clone)]
pub struct ActionExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn OutputSink>,
    exec_poll_interval: Duration,
}

impl ActionExecutor {
    /// Create an executor that forwards exec output to stdout.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            sink: Arc::new(StdoutSink),
            exec_poll_interval: DEFAULT_EXEC_POLL_INTERVAL,
        }
    }

    /// Set where exec output goes.
    pub fn with_output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set how often a running exec is polled for completion.
    pub fn with_exec_poll_interval(mut self, interval: Duration) -> Self {
        self.exec_poll_interval = interval;
        self
    }

    /// Run one action to completion, timeout or cancellation.
    pub async fn execute(&self, cancel: &CancellationToken, action: &ActionConfig) -> ActionResult {
        let start = Instant::now();
        let token = cancel.child_token();
        let _guard = token.clone().drop_guard();

        let run = async {
            match action.timeout() {
                Some(limit) => tokio::time::timeout(limit, self.dispatch(action))
                    .await
                    .unwrap_or(Err(ActionError::Timeout(limit))),
                None => self.dispatch(action).await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ActionError::Cancelled),
            outcome = run => outcome,
        };

        let duration = start.elapsed();
        match outcome {
            Ok(exit_code) => {
                tracing::debug!(
                    container = %action.container.short(),
                    kind = ?action.kind,
                    duration_ms = duration.as_millis() as u64,
                    "Action succeeded"
                );
                ActionResult::success(action, exit_code, duration)
            }
            Err(error) => {
                tracing::debug!(
                    container = %action.container.short(),
                    kind = ?action.kind,
                    error = %error,
                    "Action failed"
                );
                ActionResult::failure(action, error, duration)
            }
        }
    }

    async fn dispatch(&self, action: &ActionConfig) -> Result<Option<i64>, ActionError> {
        let container = &action.container;
        // Stop and restart reuse the timeout as the runtime's grace period
        let grace = action.timeout();

        match action.kind {
            None => Err(ActionError::UnknownKind),
            Some(ActionKind::Start) => {
                self.runtime.start_container(container).await?;
                Ok(None)
            }
            Some(ActionKind::Stop) => {
                self.runtime.stop_container(container, grace).await?;
                Ok(None)
            }
            Some(ActionKind::Restart) => {
                self.runtime.restart_container(container, grace).await?;
                Ok(None)
            }
            Some(ActionKind::Kill) => {
                self.runtime
                    .kill_container(container, action.signal_or_default())
                    .await?;
                Ok(None)
            }
            Some(ActionKind::Exec) => self.exec(action).await.map(Some),
        }
    }

    async fn exec(&self, action: &ActionConfig) -> Result<i64, ActionError> {
        if action.command.is_empty() {
            return Err(ActionError::MissingCommand);
        }

        let exec_id = self
            .runtime
            .create_exec(&action.container, &action.command)
            .await?;
        let mut output = self.runtime.start_exec(&exec_id).await?;

        let sink = Arc::clone(&self.sink);
        let container = action.container.clone();
        let mut forwarder = AbortOnDrop(tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(chunk) => sink.write(&container, &chunk).await,
                    Err(e) => {
                        tracing::warn!(container = %container.short(), error = %e, "Exec output stream failed");
                        break;
                    }
                }
            }
        }));

        let mut poll = tokio::time::interval(self.exec_poll_interval);
        let exit_code = loop {
            poll.tick().await;
            let status = self.runtime.inspect_exec(&exec_id).await?;
            if !status.running {
                break status.exit_code.ok_or_else(|| {
                    RuntimeError::Api(format!("exec {exec_id} finished without an exit code"))
                })?;
            }
        };

        // Let the forwarder drain what the runtime already sent
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut forwarder.0).await;

        if exit_code == 0 {
            Ok(exit_code)
        } else {
            Err(ActionError::ExitCode(exit_code))
        }
    }
}
