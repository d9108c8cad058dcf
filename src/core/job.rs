//! Job definition and run state.
//!
//! A [`JobDefinition`] is the plain data parsed from a container's labels. A
//! [`Job`] wraps a definition together with the mutable run state the
//! scheduler and the job's own run task share: the last and next run times
//! and the in-flight flag that prevents overlapping runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::action::ActionConfig;
use super::schedule::{Schedule, ScheduleError};
use super::types::ContainerId;

/// Errors raised when starting a run of a job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// A previous run is still in flight.
    #[error("job '{0}' is still running")]
    AlreadyRunning(String),

    /// The job's next run time has not been reached, or it has none.
    #[error("job '{0}' is not due")]
    NotDue(String),
}

/// Which hook map an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Runs after the primary action succeeded.
    Success,
    /// Runs after the primary action failed.
    Fail,
}

impl Trigger {
    /// Parse a trigger label segment (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "success" => Some(Trigger::Success),
            "fail" => Some(Trigger::Fail),
            _ => None,
        }
    }
}

/// A job as described by container labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Job name, unique among the owning container's labels.
    pub name: String,
    /// Container whose labels produced this job.
    pub owner: ContainerId,
    /// Cron expression.
    pub schedule: String,
    /// Action executed on every run.
    pub primary: ActionConfig,
    /// Hooks executed after a successful primary action, keyed by index.
    pub on_success: BTreeMap<String, ActionConfig>,
    /// Hooks executed after a failed primary action, keyed by index.
    pub on_failure: BTreeMap<String, ActionConfig>,
}

impl JobDefinition {
    /// Create an empty definition whose primary action targets the owner.
    pub fn new(name: impl Into<String>, owner: impl Into<ContainerId>) -> Self {
        let owner = owner.into();
        Self {
            name: name.into(),
            primary: ActionConfig::new(owner.clone()),
            owner,
            schedule: String::new(),
            on_success: BTreeMap::new(),
            on_failure: BTreeMap::new(),
        }
    }

    /// Builder: set the cron expression.
    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    /// Builder: set the primary action.
    pub fn with_primary(mut self, action: ActionConfig) -> Self {
        self.primary = action;
        self
    }

    /// Builder: add a hook.
    pub fn with_hook(
        mut self,
        trigger: Trigger,
        index: impl Into<String>,
        action: ActionConfig,
    ) -> Self {
        self.hooks_mut(trigger).insert(index.into(), action);
        self
    }

    /// Hooks for the given trigger.
    pub fn hooks(&self, trigger: Trigger) -> &BTreeMap<String, ActionConfig> {
        match trigger {
            Trigger::Success => &self.on_success,
            Trigger::Fail => &self.on_failure,
        }
    }

    /// Mutable hooks for the given trigger.
    pub fn hooks_mut(&mut self, trigger: Trigger) -> &mut BTreeMap<String, ActionConfig> {
        match trigger {
            Trigger::Success => &mut self.on_success,
            Trigger::Fail => &mut self.on_failure,
        }
    }
}

/// Observable state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Not running and no next run time.
    Idle,
    /// Waiting for its next run time.
    Scheduled,
    /// A run is in flight.
    Running,
    /// The cron expression is invalid; the job is never due.
    ScheduleInvalid,
}

#[derive(Debug, Default)]
struct RunState {
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    running: bool,
    schedule_invalid: bool,
}

/// Point-in-time copy of a job's definition and run state.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub definition: Arc<JobDefinition>,
    pub state: JobState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// A scheduled job: immutable definition plus synchronized run state.
#[derive(Debug)]
pub struct Job {
    definition: Arc<JobDefinition>,
    timezone: String,
    state: Mutex<RunState>,
}

impl Job {
    /// Create a job whose schedule is evaluated in UTC.
    pub fn new(definition: JobDefinition) -> Self {
        Self::with_timezone(definition, "UTC")
    }

    /// Create a job whose schedule is evaluated in the given timezone.
    pub fn with_timezone(definition: JobDefinition, timezone: impl Into<String>) -> Self {
        Self {
            definition: Arc::new(definition),
            timezone: timezone.into(),
            state: Mutex::new(RunState::default()),
        }
    }

    /// Get the definition.
    pub fn definition(&self) -> &Arc<JobDefinition> {
        &self.definition
    }

    /// Get the job name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Get the owning container.
    pub fn owner(&self) -> &ContainerId {
        &self.definition.owner
    }

    // The guard is never held across an await point.
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compute the next run time from `now`.
    ///
    /// On failure the next run time is cleared and the job is marked
    /// [`JobState::ScheduleInvalid`].
    pub fn schedule_next_run(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let mut state = self.lock();
        Self::schedule_locked(&self.definition, &self.timezone, &mut state, now)
    }

    fn schedule_locked(
        definition: &JobDefinition,
        timezone: &str,
        state: &mut RunState,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let next = Schedule::with_timezone(definition.schedule.as_str(), timezone)
            .and_then(|schedule| schedule.next_after(now));

        match next {
            Ok(next) => {
                state.next_run_at = Some(next);
                state.schedule_invalid = false;
                tracing::debug!(
                    job = %definition.name,
                    container = %definition.owner.short(),
                    next_run = %next,
                    "Scheduled next run"
                );
                Ok(next)
            }
            Err(e) => {
                state.next_run_at = None;
                state.schedule_invalid = true;
                Err(e)
            }
        }
    }

    /// Whether the job should be launched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let state = self.lock();
        Self::due_locked(&state, now)
    }

    fn due_locked(state: &RunState, now: DateTime<Utc>) -> bool {
        !state.running && state.next_run_at.is_some_and(|next| next <= now)
    }

    /// Atomically check that the job is due and mark it running.
    pub fn try_begin_run(&self, now: DateTime<Utc>) -> Result<(), JobError> {
        let mut state = self.lock();
        if state.running {
            return Err(JobError::AlreadyRunning(self.definition.name.clone()));
        }
        if !Self::due_locked(&state, now) {
            return Err(JobError::NotDue(self.definition.name.clone()));
        }
        state.running = true;
        Ok(())
    }

    /// Record the end of a run and schedule the next one.
    ///
    /// The in-flight flag is cleared whatever the scheduling outcome.
    pub fn finish_run(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let mut state = self.lock();
        state.last_run_at = state.next_run_at;
        let result = Self::schedule_locked(&self.definition, &self.timezone, &mut state, now);
        state.running = false;
        result
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Scheduled time of the previous run.
    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_run_at
    }

    /// Scheduled time of the next run, `None` if unscheduled or invalid.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.lock().next_run_at
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        let state = self.lock();
        Self::state_locked(&state)
    }

    fn state_locked(state: &RunState) -> JobState {
        if state.running {
            JobState::Running
        } else if state.schedule_invalid {
            JobState::ScheduleInvalid
        } else if state.next_run_at.is_some() {
            JobState::Scheduled
        } else {
            JobState::Idle
        }
    }

    /// Copy out the definition and run state.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        JobSnapshot {
            definition: Arc::clone(&self.definition),
            state: Self::state_locked(&state),
            last_run_at: state.last_run_at,
            next_run_at: state.next_run_at,
        }
    }
}
