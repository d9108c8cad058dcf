//! Scheduler engine.
//!
//! The [`Scheduler`] owns the job registry and, once started, a tick loop
//! that launches every due job in its own task. Jobs can be added and removed
//! while the loop runs; the orchestrator does so as containers come and go.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::job::{Job, JobDefinition, JobSnapshot};
use crate::core::schedule::ScheduleError;
use crate::core::types::{ContainerId, RunId};
use crate::events::{Event, EventBus};
use crate::execution::{ActionExecutor, OutputSink};
use crate::runtime::ContainerRuntime;

use super::handle::COMMAND_CHANNEL_BUFFER;
use super::run::JobRun;
pub use super::handle::SchedulerHandle;
pub(crate) use super::types::SchedulerCommand;
pub use super::types::{InFlightRun, ReplaceOutcome, SchedulerError, SchedulerState};

/// A spawned run, keyed by run id in the scheduler.
struct TrackedRun {
    owner: ContainerId,
    job: String,
    handle: JoinHandle<()>,
}

impl TrackedRun {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Job scheduler.
///
/// Cloning is cheap and every clone shares the same registry, so one clone
/// can run the loop while another adds and removes jobs.
#[derive(Clone)]
pub struct Scheduler {
    /// Registered jobs, in insertion order.
    jobs: Arc<RwLock<Vec<Arc<Job>>>>,
    /// Event bus for emitting events.
    event_bus: Arc<EventBus>,
    /// Executor for primary actions and hooks.
    executor: ActionExecutor,
    /// Tick interval for checking schedules.
    tick_interval: Duration,
    /// Timezone cron expressions are evaluated in.
    timezone: String,
    /// Launched runs that have not been reaped yet.
    running_jobs: Arc<RwLock<HashMap<RunId, TrackedRun>>>,
    /// Graceful shutdown timeout (default: 30 seconds).
    shutdown_timeout: Duration,
    /// Cancelled when shutdown gives up waiting for in-flight runs.
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler that executes actions against `runtime`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            event_bus: Arc::new(EventBus::new()),
            executor: ActionExecutor::new(runtime),
            tick_interval: Duration::from_secs(1),
            timezone: "UTC".to_string(),
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
            shutdown_timeout: Duration::from_secs(30),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set how often running execs are polled.
    pub fn with_exec_poll_interval(mut self, interval: Duration) -> Self {
        self.executor = self.executor.with_exec_poll_interval(interval);
        self
    }

    /// Set where exec output goes.
    pub fn with_output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.executor = self.executor.with_output_sink(sink);
        self
    }

    /// Set the timezone schedules are evaluated in. Applies to jobs added afterwards.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Register a job and compute its first run time.
    ///
    /// A job whose schedule cannot be computed is rejected and reported with
    /// [`Event::ScheduleFailed`].
    pub async fn add_job(&self, definition: JobDefinition) -> Result<(), SchedulerError> {
        let job = Arc::new(Job::with_timezone(definition, self.timezone.clone()));

        let mut jobs = self.jobs.write().await;
        match job.schedule_next_run(Utc::now()) {
            Ok(next_run) => {
                jobs.push(Arc::clone(&job));
                drop(jobs);
                tracing::info!(
                    job = %job.name(),
                    container = %job.owner().short(),
                    schedule = %job.definition().schedule,
                    next_run = %next_run,
                    "Job added"
                );
                Ok(())
            }
            Err(source) => {
                drop(jobs);
                Err(self.reject(&job, source).await)
            }
        }
    }

    /// Replace the jobs declared by `owner` with `definitions`.
    ///
    /// A job whose definition is unchanged is kept as it is, run state
    /// included. Changed and new definitions get fresh jobs. A run of a
    /// replaced job that is still in flight keeps its successor from
    /// launching until it finishes.
    pub async fn replace_jobs(
        &self,
        owner: &ContainerId,
        definitions: Vec<JobDefinition>,
    ) -> ReplaceOutcome {
        let now = Utc::now();
        let mut outcome = ReplaceOutcome::default();
        let mut rejected = Vec::new();

        let mut jobs = self.jobs.write().await;
        let (mut current, others): (Vec<Arc<Job>>, Vec<Arc<Job>>) =
            jobs.drain(..).partition(|job| job.owner() == owner);

        let mut replacement = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if let Some(pos) = current
                .iter()
                .position(|job| **job.definition() == definition)
            {
                replacement.push(current.remove(pos));
                outcome.kept += 1;
                continue;
            }

            let job = Arc::new(Job::with_timezone(definition, self.timezone.clone()));
            match job.schedule_next_run(now) {
                Ok(_) => {
                    replacement.push(job);
                    outcome.added += 1;
                }
                Err(source) => rejected.push((job, source)),
            }
        }
        outcome.removed = current.len();
        outcome.rejected = rejected.len();

        *jobs = others;
        jobs.extend(replacement);
        drop(jobs);

        for (job, source) in rejected {
            self.reject(&job, source).await;
        }
        if outcome.added > 0 || outcome.removed > 0 {
            tracing::info!(
                container = %owner.short(),
                kept = outcome.kept,
                added = outcome.added,
                removed = outcome.removed,
                "Replaced jobs"
            );
        }
        outcome
    }

    /// Log and report a job whose schedule cannot be computed.
    async fn reject(&self, job: &Job, source: ScheduleError) -> SchedulerError {
        tracing::warn!(
            job = %job.name(),
            container = %job.owner().short(),
            schedule = %job.definition().schedule,
            error = %source,
            "Rejected job with invalid schedule"
        );
        self.event_bus
            .emit(Event::schedule_failed(
                job.name(),
                job.owner().clone(),
                source.to_string(),
            ))
            .await;
        SchedulerError::InvalidSchedule {
            job: job.name().to_string(),
            source,
        }
    }

    /// Remove every job declared by `owner`. Returns how many were removed.
    ///
    /// Runs already in flight finish normally.
    pub async fn remove_jobs_by_owner(&self, owner: &ContainerId) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|job| job.owner() != owner);
        let removed = before - jobs.len();
        drop(jobs);

        if removed > 0 {
            tracing::info!(container = %owner.short(), removed, "Removed jobs");
        }
        removed
    }

    /// Snapshot of every registered job, in registration order.
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|job| job.snapshot())
            .collect()
    }

    /// Containers that currently own at least one job.
    pub async fn owners(&self) -> BTreeSet<ContainerId> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|job| job.owner().clone())
            .collect()
    }

    /// Number of runs in flight.
    pub async fn running_count(&self) -> usize {
        let running = self.running_jobs.read().await;
        running.values().filter(|run| !run.is_finished()).count()
    }

    /// Start the tick loop and return a handle for controlling it.
    pub fn start(&self) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let scheduler = self.clone();
        let scheduler_task = tokio::spawn(async move {
            scheduler.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(tick_interval = ?self.tick_interval, "Scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.launch_due_jobs(Utc::now()).await;

                    // Clean up finished job handles
                    self.cleanup_finished_jobs().await;
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::InFlight { response } => {
                            self.cleanup_finished_jobs().await;
                            let _ = response.send(self.in_flight().await);
                        }
                        SchedulerCommand::Shutdown { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Stopped;
                            drop(s); // Release the lock before waiting

                            self.await_running_jobs().await;
                            self.cancel.cancel();

                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Launch every job that is due at `now`.
    async fn launch_due_jobs(&self, now: DateTime<Utc>) {
        let due: Vec<Arc<Job>> = {
            let jobs = self.jobs.read().await;
            jobs.iter().filter(|job| job.is_due(now)).cloned().collect()
        };

        for job in due {
            match self.launch(Arc::clone(&job), now).await {
                Ok(_) => {}
                Err(SchedulerError::AlreadyRunning(_)) => {
                    tracing::debug!(
                        job = %job.name(),
                        container = %job.owner().short(),
                        "Previous run still in flight"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        job = %job.name(),
                        container = %job.owner().short(),
                        error = %e,
                        "Skipped job launch"
                    );
                }
            }
        }
    }

    /// Mark a job running and spawn its run.
    ///
    /// A job replaced while its predecessor is still running waits for
    /// that run to finish.
    async fn launch(&self, job: Arc<Job>, now: DateTime<Utc>) -> Result<RunId, SchedulerError> {
        if self.run_in_flight(job.owner(), job.name()).await {
            return Err(SchedulerError::AlreadyRunning(job.name().to_string()));
        }
        job.try_begin_run(now)?;

        let run_id = RunId::new();
        let owner = job.owner().clone();
        let name = job.name().to_string();
        let run = JobRun {
            job,
            run_id,
            executor: self.executor.clone(),
            event_bus: Arc::clone(&self.event_bus),
            cancel: self.cancel.child_token(),
        };

        let handle = tokio::spawn(run.execute());
        self.running_jobs
            .write()
            .await
            .insert(
                run_id,
                TrackedRun {
                    owner,
                    job: name,
                    handle,
                },
            );

        Ok(run_id)
    }

    /// Whether a run of the job `name` declared by `owner` is still going.
    async fn run_in_flight(&self, owner: &ContainerId, name: &str) -> bool {
        self.running_jobs
            .read()
            .await
            .values()
            .any(|run| !run.is_finished() && &run.owner == owner && run.job == name)
    }

    /// Runs still tracked, sorted by job name.
    async fn in_flight(&self) -> Vec<InFlightRun> {
        let running = self.running_jobs.read().await;
        let mut runs: Vec<InFlightRun> = running
            .iter()
            .map(|(run_id, run)| InFlightRun {
                run_id: *run_id,
                job: run.job.clone(),
            })
            .collect();
        runs.sort_by(|a, b| a.job.cmp(&b.job));
        runs
    }

    /// Clean up finished job handles.
    async fn cleanup_finished_jobs(&self) {
        let mut running = self.running_jobs.write().await;
        running.retain(|_, run| !run.is_finished());
    }

    /// Wait for all running jobs to complete with a timeout.
    async fn await_running_jobs(&self) {
        let running_count = self.running_count().await;

        if running_count == 0 {
            tracing::info!("No running jobs to wait for during shutdown");
            return;
        }

        tracing::info!(
            "Graceful shutdown: waiting for {} running job(s) to complete (timeout: {:?})",
            running_count,
            self.shutdown_timeout
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.shutdown_timeout;

        loop {
            let mut running = self.running_jobs.write().await;
            running.retain(|_, run| !run.is_finished());
            let remaining = running.len();
            drop(running);

            if remaining == 0 {
                let elapsed = start.elapsed();
                tracing::info!("All running jobs completed gracefully in {:?}", elapsed);
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                let running = self.running_jobs.read().await;
                let names: Vec<&str> = running.values().map(|run| run.job.as_str()).collect();
                tracing::warn!(
                    jobs = ?names,
                    "Graceful shutdown timeout ({:?}) exceeded with {} job(s) still running; cancelling",
                    self.shutdown_timeout,
                    remaining
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
