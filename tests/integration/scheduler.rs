//! Scheduled run integration tests.
//!
//! Tests that jobs declared through labels run on schedule against a
//! container runtime, with the right hook chain after the primary action.

use crate::common::{EVERY_SECOND, labels, recording_scheduler, wait_for_events};
use cronify::runtime::{OutputChunk, OutputStream};
use cronify::testing::{MockRuntime, RuntimeCall};
use cronify::{ActionKind, ActionPhase, ContainerId, Event, SchedulerState, parse_jobs};
use std::sync::Arc;
use std::time::Duration;

fn backup_labels() -> std::collections::HashMap<String, String> {
    labels(&[
        ("cronify.backup.schedule", EVERY_SECOND),
        ("cronify.backup.type", "exec"),
        ("cronify.backup.command", "backup.sh --full"),
        ("cronify.backup.success.type", "restart"),
        ("cronify.backup.success.container", "proxy"),
        ("cronify.backup.fail.0.type", "exec"),
        ("cronify.backup.fail.0.command", "notify.sh"),
        ("cronify.backup.fail.1.type", "kill"),
        ("cronify.backup.fail.1.signal", "SIGHUP"),
    ])
}

fn is_job_completed(event: &Event) -> bool {
    matches!(event, Event::JobCompleted { .. })
}

#[tokio::test]
async fn test_successful_run_triggers_success_hooks() {
    let runtime = Arc::new(MockRuntime::new());
    // Output is drained into a discarding sink and does not affect the run
    runtime.set_exec_output(vec![
        OutputChunk {
            stream: OutputStream::Stdout,
            data: b"dumped 3 tables\n".to_vec(),
        },
        OutputChunk {
            stream: OutputStream::Stderr,
            data: b"warning: slow disk\n".to_vec(),
        },
    ]);
    let (scheduler, handler) = recording_scheduler(&runtime).await;

    let db = ContainerId::new("db");
    for (_, job) in parse_jobs(&backup_labels(), &db) {
        scheduler.add_job(job).await.unwrap();
    }

    let (handle, _task) = scheduler.start();
    wait_for_events(&handler, is_job_completed, 1, Duration::from_secs(5)).await;
    handle.shutdown().await.unwrap();

    let events = handler.events().await;
    let first_run: Vec<&Event> = events.iter().take(4).collect();

    assert!(matches!(first_run[0], Event::JobStarted { job, owner, .. } if job == "backup" && owner == &db));
    assert!(matches!(
        first_run[1],
        Event::ActionCompleted { phase: ActionPhase::Primary, kind: Some(ActionKind::Exec), exit_code: Some(0), .. }
    ));
    assert!(matches!(
        first_run[2],
        Event::ActionCompleted { phase: ActionPhase::OnSuccess(index), container, kind: Some(ActionKind::Restart), .. }
            if index == "default" && container.as_str() == "proxy"
    ));
    assert!(matches!(
        first_run[3],
        Event::JobCompleted { success: true, next_run_at: Some(_), .. }
    ));

    let calls = runtime.calls();
    assert!(calls.contains(&RuntimeCall::CreateExec(
        db.clone(),
        vec!["backup.sh".to_string(), "--full".to_string()]
    )));
    assert!(calls.contains(&RuntimeCall::Restart(ContainerId::new("proxy"), None)));
    assert_eq!(
        runtime.count_calls(|call| matches!(call, RuntimeCall::Kill(..))),
        0
    );
}

#[tokio::test]
async fn test_failed_run_triggers_fail_hooks_in_order() {
    let runtime = Arc::new(MockRuntime::new());
    runtime.set_exec_exit_code(3);
    let (scheduler, handler) = recording_scheduler(&runtime).await;

    let db = ContainerId::new("db");
    for (_, job) in parse_jobs(&backup_labels(), &db) {
        scheduler.add_job(job).await.unwrap();
    }

    let (handle, _task) = scheduler.start();
    wait_for_events(&handler, is_job_completed, 1, Duration::from_secs(5)).await;
    handle.shutdown().await.unwrap();

    // The notify hook also exits non-zero; the chain still reaches the kill
    let actions: Vec<RuntimeCall> = runtime
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(
                call,
                RuntimeCall::CreateExec(..) | RuntimeCall::Kill(..) | RuntimeCall::Restart(..)
            )
        })
        .take(3)
        .collect();
    assert_eq!(
        actions,
        vec![
            RuntimeCall::CreateExec(
                db.clone(),
                vec!["backup.sh".to_string(), "--full".to_string()]
            ),
            RuntimeCall::CreateExec(db.clone(), vec!["notify.sh".to_string()]),
            RuntimeCall::Kill(db.clone(), "SIGHUP".to_string()),
        ]
    );

    let events = handler.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ActionFailed { phase: ActionPhase::Primary, exit_code: Some(3), .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ActionCompleted { phase: ActionPhase::OnFailure(index), kind: Some(ActionKind::Kill), .. }
            if index == "1"
    )));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::JobCompleted { success: false, .. }))
    );
}

#[tokio::test]
async fn test_graceful_shutdown_lets_run_finish() {
    let runtime = Arc::new(MockRuntime::new());
    runtime.set_exec_duration(Duration::from_millis(800));
    let (scheduler, handler) = recording_scheduler(&runtime).await;

    let jobs = parse_jobs(
        &labels(&[
            ("cronify.report.schedule", EVERY_SECOND),
            ("cronify.report.type", "exec"),
            ("cronify.report.command", "report.sh"),
        ]),
        &ContainerId::new("app"),
    );
    for (_, job) in jobs {
        scheduler.add_job(job).await.unwrap();
    }

    let (handle, task) = scheduler.start();
    wait_for_events(
        &handler,
        |e| matches!(e, Event::JobStarted { .. }),
        1,
        Duration::from_secs(5),
    )
    .await;

    handle.shutdown().await.unwrap();

    // The in-flight run completed before shutdown returned
    assert_eq!(handler.count(is_job_completed).await, 1);
    assert!(
        handler
            .count(|e| matches!(e, Event::JobCompleted { success: true, .. }))
            .await
            >= 1
    );
    assert_eq!(handle.state().await, SchedulerState::Stopped);
    assert_eq!(scheduler.running_count().await, 0);

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("scheduler loop should exit after shutdown")
        .unwrap();
}
