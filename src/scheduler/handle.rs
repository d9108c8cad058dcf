//! Control surface for a started scheduler loop.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use super::types::{InFlightRun, SchedulerCommand, SchedulerError, SchedulerState};

/// Buffer size for the command channel between SchedulerHandle and Scheduler.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle returned by [`Scheduler::start`](super::Scheduler::start).
///
/// Clones share the same loop; once the loop has exited every request
/// fails with [`SchedulerError::ChannelError`].
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) command_tx: mpsc::Sender<SchedulerCommand>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    /// Send a command to the loop and wait for its reply.
    async fn request<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<T, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| SchedulerError::ChannelError(format!("{operation}: scheduler is gone")))?;

        response_rx
            .await
            .map_err(|_| SchedulerError::ChannelError(format!("{operation}: no reply")))
    }

    /// Runs the loop has launched that have not finished yet.
    pub async fn in_flight(&self) -> Result<Vec<InFlightRun>, SchedulerError> {
        self.request(|response| SchedulerCommand::InFlight { response }, "in_flight")
            .await
    }

    /// Stop launching jobs, wait for in-flight runs up to the shutdown
    /// timeout, then cancel whatever is still running.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request(|response| SchedulerCommand::Shutdown { response }, "shutdown")
            .await
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == SchedulerState::Running
    }
}
