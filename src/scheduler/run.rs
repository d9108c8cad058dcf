//! One run of a job: primary action, hook chain, reschedule.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::job::{Job, Trigger};
use crate::core::types::RunId;
use crate::events::{ActionPhase, Event, EventBus};
use crate::execution::ActionExecutor;

/// Clears the job's in-flight flag if the run ends without reaching
/// `finish_run` (panic or abort).
struct FinishGuard {
    job: Arc<Job>,
    armed: bool,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.job.finish_run(Utc::now());
        }
    }
}

/// Everything a spawned run needs.
pub(crate) struct JobRun {
    pub(crate) job: Arc<Job>,
    pub(crate) run_id: RunId,
    pub(crate) executor: ActionExecutor,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) cancel: CancellationToken,
}

impl JobRun {
    /// Execute the run. The job must already be marked running.
    pub(crate) async fn execute(self) {
        let mut guard = FinishGuard {
            job: Arc::clone(&self.job),
            armed: true,
        };

        let start = Instant::now();
        let definition = Arc::clone(self.job.definition());
        let name = definition.name.as_str();
        let owner = &definition.owner;

        tracing::info!(job = %name, container = %owner.short(), run_id = %self.run_id, "Running job");
        self.event_bus
            .emit(Event::job_started(name, owner.clone(), self.run_id))
            .await;

        let primary = self
            .executor
            .execute(&self.cancel, &definition.primary)
            .await;
        self.event_bus
            .emit(Event::action_finished(
                name,
                owner.clone(),
                self.run_id,
                ActionPhase::Primary,
                &primary,
            ))
            .await;

        let trigger = if primary.success {
            Trigger::Success
        } else {
            Trigger::Fail
        };

        // Hooks run one after another; a failing hook does not stop the chain
        for (index, action) in definition.hooks(trigger) {
            let phase = match trigger {
                Trigger::Success => ActionPhase::OnSuccess(index.clone()),
                Trigger::Fail => ActionPhase::OnFailure(index.clone()),
            };
            let result = self.executor.execute(&self.cancel, action).await;
            if let Some(error) = &result.error {
                tracing::warn!(job = %name, hook = %phase, error = %error, "Hook failed");
            }
            self.event_bus
                .emit(Event::action_finished(
                    name,
                    owner.clone(),
                    self.run_id,
                    phase,
                    &result,
                ))
                .await;
        }

        guard.armed = false;
        let next_run_at = match self.job.finish_run(Utc::now()) {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::warn!(job = %name, container = %owner.short(), error = %e, "Failed to reschedule job");
                self.event_bus
                    .emit(Event::schedule_failed(name, owner.clone(), e.to_string()))
                    .await;
                None
            }
        };

        let duration = start.elapsed();
        tracing::info!(
            job = %name,
            run_id = %self.run_id,
            success = primary.success,
            duration_ms = duration.as_millis() as u64,
            "Job run finished"
        );
        self.event_bus
            .emit(Event::job_completed(
                name,
                owner.clone(),
                self.run_id,
                primary.success,
                duration,
                next_run_at,
            ))
            .await;
    }
}
