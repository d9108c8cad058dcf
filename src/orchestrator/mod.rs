//! Keeps the scheduler's registry in step with the containers that exist.
//!
//! On startup [`Orchestrator::sync`] registers the jobs of every opted-in
//! container. [`Orchestrator::watch`] then follows container lifecycle events:
//! created containers add jobs, destroyed ones remove them, updated ones get
//! their jobs replaced. A broken event stream is reopened with exponential
//! backoff, followed by a full [`Orchestrator::resync`] to pick up whatever
//! happened while it was down.

use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{LabelParser, WatchConfig};
use crate::core::types::ContainerId;
use crate::runtime::{
    ContainerEvent, ContainerEventAction, ContainerFilter, ContainerInfo, ContainerRuntime,
    RuntimeError,
};
use crate::scheduler::Scheduler;

/// Counters from a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Containers inspected.
    pub containers: usize,
    /// Jobs registered.
    pub jobs_added: usize,
    /// Jobs rejected by the scheduler (invalid schedule).
    pub jobs_rejected: usize,
    /// Jobs removed because their container vanished or changed.
    pub jobs_removed: usize,
    /// Labels skipped by the parser.
    pub label_errors: usize,
}

/// Drives the scheduler from container discovery and lifecycle events.
pub struct Orchestrator {
    scheduler: Scheduler,
    runtime: Arc<dyn ContainerRuntime>,
    parser: LabelParser,
    filter: ContainerFilter,
    watch: WatchConfig,
}

impl Orchestrator {
    pub fn new(
        scheduler: Scheduler,
        runtime: Arc<dyn ContainerRuntime>,
        parser: LabelParser,
        filter: ContainerFilter,
        watch: WatchConfig,
    ) -> Self {
        Self {
            scheduler,
            runtime,
            parser,
            filter,
            watch,
        }
    }

    /// The scheduler being driven.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Register the jobs of every container matching the filter.
    pub async fn sync(&self) -> Result<SyncReport, RuntimeError> {
        let containers = self.runtime.list_containers(&self.filter).await?;
        let mut report = SyncReport {
            containers: containers.len(),
            ..Default::default()
        };

        for container in &containers {
            self.register(container, &mut report).await;
        }

        tracing::info!(
            containers = report.containers,
            jobs = report.jobs_added,
            rejected = report.jobs_rejected,
            label_errors = report.label_errors,
            "Initial sync complete"
        );
        Ok(report)
    }

    /// Reconcile the registry with the containers that exist now.
    ///
    /// Jobs of vanished containers are removed. Jobs whose definitions
    /// changed are replaced; unchanged ones keep their run state.
    pub async fn resync(&self) -> Result<SyncReport, RuntimeError> {
        let containers = self.runtime.list_containers(&self.filter).await?;
        let mut report = SyncReport {
            containers: containers.len(),
            ..Default::default()
        };

        let live: BTreeSet<&ContainerId> = containers.iter().map(|c| &c.id).collect();
        for owner in self.scheduler.owners().await {
            if !live.contains(&owner) {
                report.jobs_removed += self.scheduler.remove_jobs_by_owner(&owner).await;
            }
        }

        for container in &containers {
            self.register(container, &mut report).await;
        }

        tracing::info!(
            containers = report.containers,
            added = report.jobs_added,
            removed = report.jobs_removed,
            "Resync complete"
        );
        Ok(report)
    }

    /// Follow container events until `cancel` fires.
    pub async fn watch(&self, cancel: CancellationToken) {
        let mut backoff = self.watch.initial_backoff();
        let mut reconnecting = false;

        loop {
            let mut events = self.runtime.watch_events(&self.filter);
            if reconnecting {
                if let Err(e) = self.resync().await {
                    tracing::warn!(error = %e, "Resync after reconnect failed");
                }
            }
            tracing::info!(filter = %self.filter.label, "Watching container events");

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = events.next() => next,
                };

                match next {
                    Some(Ok(event)) => {
                        backoff = self.watch.initial_backoff();
                        self.handle_event(event).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Container event stream failed");
                        break;
                    }
                    None => {
                        tracing::warn!("Container event stream ended");
                        break;
                    }
                }
            }
            drop(events);

            tracing::info!(delay = ?backoff, "Reconnecting to container event stream");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, self.watch.max_backoff());
            reconnecting = true;
        }
    }

    /// Apply one container event to the registry.
    pub async fn handle_event(&self, event: ContainerEvent) {
        let id = event.container;
        match &event.action {
            ContainerEventAction::Create | ContainerEventAction::Update => {
                let info = match self.runtime.inspect_container(&id).await {
                    Ok(info) => info,
                    Err(RuntimeError::NotFound(_)) => {
                        tracing::debug!(container = %id.short(), "Container vanished before inspection");
                        self.scheduler.remove_jobs_by_owner(&id).await;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(container = %id.short(), error = %e, "Failed to inspect container");
                        return;
                    }
                };

                if !self.filter.matches(&info.labels) {
                    let removed = self.scheduler.remove_jobs_by_owner(&info.id).await;
                    tracing::debug!(container = %id.short(), removed, "Container no longer matches filter");
                    return;
                }

                let mut report = SyncReport::default();
                self.register(&info, &mut report).await;
                tracing::debug!(
                    container = %id.short(),
                    action = %event.action,
                    added = report.jobs_added,
                    removed = report.jobs_removed,
                    rejected = report.jobs_rejected,
                    "Applied container jobs"
                );
            }
            ContainerEventAction::Destroy => {
                self.scheduler.remove_jobs_by_owner(&id).await;
            }
            ContainerEventAction::Other(action) => {
                tracing::debug!(container = %id.short(), action = %action, "Ignoring container event");
            }
        }
    }

    /// Bring the registry in line with one container's labels.
    async fn register(&self, container: &ContainerInfo, report: &mut SyncReport) {
        let parsed = self.parser.parse(&container.labels, &container.id);
        report.label_errors += parsed.errors.len();

        let outcome = self
            .scheduler
            .replace_jobs(&container.id, parsed.jobs.into_values().collect())
            .await;
        report.jobs_added += outcome.added;
        report.jobs_removed += outcome.removed;
        report.jobs_rejected += outcome.rejected;
    }
}

/// Double the delay, capped at `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
