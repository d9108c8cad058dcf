//! Common test utilities shared across integration tests.

use cronify::testing::{MockRuntime, RecordingHandler, RuntimeCall};
use cronify::{ContainerRuntime, Event, EventBus, NullSink, Scheduler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Fires every second.
pub const EVERY_SECOND: &str = "* * * * * *";

/// Build a label map from key/value pairs.
pub fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// A fast-ticking scheduler over `runtime` with a recording handler attached
/// and exec output discarded.
pub async fn recording_scheduler(runtime: &Arc<MockRuntime>) -> (Scheduler, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::new());
    let bus = EventBus::new();
    bus.register(handler.clone()).await;

    let runtime: Arc<dyn ContainerRuntime> = runtime.clone();
    let scheduler = Scheduler::new(runtime)
        .with_event_bus(bus)
        .with_tick_interval(Duration::from_millis(50))
        .with_exec_poll_interval(Duration::from_millis(20))
        .with_output_sink(Arc::new(NullSink));
    (scheduler, handler)
}

/// Wait until at least `count` recorded events match `predicate`.
///
/// Polls every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_events(
    handler: &RecordingHandler,
    predicate: impl Fn(&Event) -> bool,
    count: usize,
    timeout: Duration,
) {
    let start = tokio::time::Instant::now();
    loop {
        let seen = handler.count(&predicate).await;
        if seen >= count {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {} matching events, saw {}", count, seen);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until at least `count` runtime calls match `predicate`.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_calls(
    runtime: &MockRuntime,
    predicate: impl Fn(&RuntimeCall) -> bool,
    count: usize,
    timeout: Duration,
) {
    let start = tokio::time::Instant::now();
    loop {
        let seen = runtime.count_calls(&predicate);
        if seen >= count {
            return;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} matching runtime calls, saw {}: {:?}",
                count,
                seen,
                runtime.calls()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the scheduler holds exactly `count` jobs.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_job_count(scheduler: &Scheduler, count: usize, timeout: Duration) {
    let start = tokio::time::Instant::now();
    loop {
        let jobs = scheduler.jobs().await.len();
        if jobs == count {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {} jobs, have {}", count, jobs);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
