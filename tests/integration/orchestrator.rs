//! Container discovery integration tests.
//!
//! Tests that the orchestrator keeps scheduled jobs in step with containers
//! as they are created, updated and destroyed, and that running jobs
//! follow along.

use crate::common::{
    EVERY_SECOND, labels, recording_scheduler, wait_for_calls, wait_for_job_count,
};
use cronify::testing::{MockRuntime, RuntimeCall};
use cronify::{
    ContainerEvent, ContainerEventAction, ContainerFilter, ContainerId, ContainerRuntime,
    LabelParser, Orchestrator, RuntimeError, Scheduler, SyncReport, WatchConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn restart_labels(job: &str, schedule: &str) -> HashMap<String, String> {
    let schedule_key = format!("cronify.{job}.schedule");
    let type_key = format!("cronify.{job}.type");
    labels(&[
        ("cronify", "true"),
        (schedule_key.as_str(), schedule),
        (type_key.as_str(), "restart"),
    ])
}

fn orchestrator(runtime: &Arc<MockRuntime>, scheduler: Scheduler) -> Arc<Orchestrator> {
    let runtime: Arc<dyn ContainerRuntime> = runtime.clone();
    Arc::new(Orchestrator::new(
        scheduler,
        runtime,
        LabelParser::default(),
        ContainerFilter::default(),
        WatchConfig {
            initial_backoff_ms: 20,
            max_backoff_ms: 100,
        },
    ))
}

fn spawn_watch(
    orchestrator: &Arc<Orchestrator>,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let orchestrator = Arc::clone(orchestrator);
    let cancel = cancel.clone();
    tokio::spawn(async move { orchestrator.watch(cancel).await })
}

async fn wait_for_watch(runtime: &MockRuntime, count: usize) {
    wait_for_calls(
        runtime,
        |call| matches!(call, RuntimeCall::WatchEvents),
        count,
        Duration::from_secs(2),
    )
    .await;
}

fn restarts_of(runtime: &MockRuntime, id: &str) -> usize {
    runtime.count_calls(|call| matches!(call, RuntimeCall::Restart(c, _) if c.as_str() == id))
}

#[tokio::test]
async fn test_container_lifecycle_drives_jobs() {
    let runtime = Arc::new(MockRuntime::new());
    let (scheduler, _handler) = recording_scheduler(&runtime).await;
    let orchestrator = orchestrator(&runtime, scheduler.clone());

    let (handle, _task) = scheduler.start();
    assert_eq!(orchestrator.sync().await.unwrap(), SyncReport::default());

    let cancel = CancellationToken::new();
    let watcher = spawn_watch(&orchestrator, &cancel);
    wait_for_watch(&runtime, 1).await;

    // A new opted-in container starts getting its job run
    runtime.add_container("web", restart_labels("bounce", EVERY_SECOND));
    runtime.emit(ContainerEvent {
        action: ContainerEventAction::Create,
        container: "web".into(),
    });
    wait_for_job_count(&scheduler, 1, Duration::from_secs(2)).await;
    wait_for_calls(
        &runtime,
        |call| matches!(call, RuntimeCall::Restart(c, _) if c.as_str() == "web"),
        1,
        Duration::from_secs(3),
    )
    .await;

    // Once destroyed, nothing of it runs again
    runtime.remove_container(&"web".into());
    runtime.emit(ContainerEvent {
        action: ContainerEventAction::Destroy,
        container: "web".into(),
    });
    wait_for_job_count(&scheduler, 0, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let restarts = restarts_of(&runtime, "web");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(restarts_of(&runtime, "web"), restarts);

    cancel.cancel();
    watcher.await.unwrap();
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_update_replaces_jobs_and_drops_opted_out_containers() {
    let runtime = Arc::new(MockRuntime::new());
    let (scheduler, _handler) = recording_scheduler(&runtime).await;
    let orchestrator = orchestrator(&runtime, scheduler.clone());

    runtime.add_container("app", restart_labels("nightly", "0 0 3 * * *"));
    let report = orchestrator.sync().await.unwrap();
    assert_eq!(report.containers, 1);
    assert_eq!(report.jobs_added, 1);

    let cancel = CancellationToken::new();
    let watcher = spawn_watch(&orchestrator, &cancel);
    wait_for_watch(&runtime, 1).await;

    // Relabelled: the old job goes, the new one takes its place
    runtime.add_container("app", restart_labels("hourly", "@hourly"));
    runtime.emit(ContainerEvent {
        action: ContainerEventAction::Update,
        container: "app".into(),
    });
    for _ in 0..100 {
        let names: Vec<String> = scheduler
            .jobs()
            .await
            .iter()
            .map(|job| job.definition.name.clone())
            .collect();
        if names == ["hourly"] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let jobs = scheduler.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].definition.name, "hourly");
    assert_eq!(jobs[0].definition.schedule, "@hourly");

    // Opting out removes every job of the container
    let mut opted_out = restart_labels("hourly", "@hourly");
    opted_out.remove("cronify");
    runtime.add_container("app", opted_out);
    runtime.emit(ContainerEvent {
        action: ContainerEventAction::Update,
        container: "app".into(),
    });
    wait_for_job_count(&scheduler, 0, Duration::from_secs(2)).await;

    cancel.cancel();
    watcher.await.unwrap();
}

#[tokio::test]
async fn test_stream_failure_recovers_missed_changes() {
    let runtime = Arc::new(MockRuntime::new());
    let (scheduler, _handler) = recording_scheduler(&runtime).await;
    let orchestrator = orchestrator(&runtime, scheduler.clone());

    runtime.add_container("keep", restart_labels("keep", "@daily"));
    runtime.add_container("gone", restart_labels("gone", "@daily"));
    orchestrator.sync().await.unwrap();
    assert_eq!(scheduler.jobs().await.len(), 2);

    let cancel = CancellationToken::new();
    let watcher = spawn_watch(&orchestrator, &cancel);
    wait_for_watch(&runtime, 1).await;

    // Changes made while the stream is down are never delivered as events
    runtime.break_event_streams(RuntimeError::Stream("daemon restarted".into()));
    runtime.remove_container(&"gone".into());
    runtime.add_container("new", restart_labels("fresh", "@weekly"));

    wait_for_watch(&runtime, 2).await;
    for _ in 0..100 {
        if scheduler.owners().await.len() == 2
            && scheduler.jobs().await.iter().any(|j| j.definition.name == "fresh")
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let owners: Vec<ContainerId> = scheduler.owners().await.into_iter().collect();
    assert_eq!(owners, vec![ContainerId::new("keep"), ContainerId::new("new")]);

    cancel.cancel();
    watcher.await.unwrap();
}

#[tokio::test]
async fn test_sync_reports_bad_labels_and_schedules() {
    let runtime = Arc::new(MockRuntime::new());
    let (scheduler, _handler) = recording_scheduler(&runtime).await;
    let orchestrator = orchestrator(&runtime, scheduler.clone());

    let mut mixed = restart_labels("good", "@daily");
    mixed.insert("cronify.bad.schedule".into(), "whenever".into());
    mixed.insert("cronify.bad.type".into(), "start".into());
    mixed.insert("cronify.good.colour".into(), "blue".into());
    runtime.add_container("mixed", mixed);

    let report = orchestrator.sync().await.unwrap();
    assert_eq!(
        report,
        SyncReport {
            containers: 1,
            jobs_added: 1,
            jobs_rejected: 1,
            jobs_removed: 0,
            label_errors: 1,
        }
    );

    let jobs = scheduler.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].definition.name, "good");
}
