//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use crate::core::job::JobError;
use crate::core::schedule::ScheduleError;
use crate::core::types::RunId;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job's schedule could not be computed; the job was not added.
    #[error("invalid schedule for job '{job}': {source}")]
    InvalidSchedule {
        job: String,
        #[source]
        source: ScheduleError,
    },

    /// A run was requested while the previous one is still in flight.
    #[error("job '{0}' is still running")]
    AlreadyRunning(String),

    /// A run was requested before the job's next run time.
    #[error("job '{0}' is not due")]
    NotDue(String),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

impl From<JobError> for SchedulerError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::AlreadyRunning(job) => SchedulerError::AlreadyRunning(job),
            JobError::NotDue(job) => SchedulerError::NotDue(job),
        }
    }
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
}

/// What [`Scheduler::replace_jobs`](super::Scheduler::replace_jobs) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Unchanged jobs left in place.
    pub kept: usize,
    /// New or changed jobs registered.
    pub added: usize,
    /// Old jobs dropped.
    pub removed: usize,
    /// Definitions whose schedule could not be computed.
    pub rejected: usize,
}

/// A run that has been launched and not yet reaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightRun {
    pub run_id: RunId,
    pub job: String,
}

/// Commands that can be sent to the scheduler loop.
pub(crate) enum SchedulerCommand {
    /// List the runs currently in flight.
    InFlight {
        response: oneshot::Sender<Vec<InFlightRun>>,
    },
    /// Stop launching, drain in-flight runs and exit the loop.
    Shutdown { response: oneshot::Sender<()> },
}
