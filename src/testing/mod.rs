//! Testing utilities.
//!
//! - [`MockRuntime`]: an in-memory [`ContainerRuntime`] that records calls
//! - [`RecordingSink`]: an [`OutputSink`] that keeps exec output
//! - [`RecordingHandler`]: an [`EventHandler`] that keeps events

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::core::types::ContainerId;
use crate::events::{Event, EventHandler};
use crate::execution::OutputSink;
use crate::runtime::{
    ContainerEvent, ContainerFilter, ContainerInfo, ContainerRuntime, EventStream, ExecOutput,
    ExecStatus, OutputChunk, OutputStream, RuntimeError,
};

/// A call made against a [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    ListContainers,
    InspectContainer(ContainerId),
    WatchEvents,
    Start(ContainerId),
    Stop(ContainerId, Option<Duration>),
    Restart(ContainerId, Option<Duration>),
    Kill(ContainerId, String),
    CreateExec(ContainerId, Vec<String>),
    StartExec(String),
    InspectExec(String),
}

type EventSender = mpsc::UnboundedSender<Result<ContainerEvent, RuntimeError>>;

struct MockState {
    containers: BTreeMap<ContainerId, HashMap<String, String>>,
    calls: Vec<RuntimeCall>,
    failure: Option<RuntimeError>,
    action_delay: Duration,
    exec_exit_code: i64,
    exec_duration: Duration,
    exec_output: Vec<OutputChunk>,
    exec_started: HashMap<String, Instant>,
    next_exec: u64,
    subscribers: Vec<EventSender>,
}

/// An in-memory container runtime.
///
/// Containers, exec behavior and failures are configured up front; every call
/// is recorded and can be inspected with [`MockRuntime::calls`]. Event streams
/// handed out by `watch_events` are fed with [`MockRuntime::emit`].
///
/// # Example
///
/// ```
/// use cronify::testing::MockRuntime;
/// use std::collections::HashMap;
///
/// let runtime = MockRuntime::new();
/// runtime.add_container("c1", HashMap::from([("cronify".to_string(), "true".to_string())]));
/// runtime.set_exec_exit_code(3);
/// assert!(runtime.calls().is_empty());
/// ```
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    /// Create a runtime with no containers whose execs exit 0 immediately.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                containers: BTreeMap::new(),
                calls: Vec::new(),
                failure: None,
                action_delay: Duration::ZERO,
                exec_exit_code: 0,
                exec_duration: Duration::ZERO,
                exec_output: Vec::new(),
                exec_started: HashMap::new(),
                next_exec: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: RuntimeCall) -> Result<Duration, RuntimeError> {
        let mut state = self.lock();
        state.calls.push(call);
        match &state.failure {
            Some(err) => Err(err.clone()),
            None => Ok(state.action_delay),
        }
    }

    /// Add or replace a container.
    pub fn add_container(&self, id: impl Into<ContainerId>, labels: HashMap<String, String>) {
        self.lock().containers.insert(id.into(), labels);
    }

    /// Remove a container.
    pub fn remove_container(&self, id: &ContainerId) {
        self.lock().containers.remove(id);
    }

    /// Make every lifecycle and exec call fail with `error`.
    pub fn fail_with(&self, error: RuntimeError) {
        self.lock().failure = Some(error);
    }

    /// Undo [`MockRuntime::fail_with`].
    pub fn clear_failure(&self) {
        self.lock().failure = None;
    }

    /// Delay start, stop, restart and kill calls.
    pub fn set_action_delay(&self, delay: Duration) {
        self.lock().action_delay = delay;
    }

    /// Exit code reported by finished execs.
    pub fn set_exec_exit_code(&self, code: i64) {
        self.lock().exec_exit_code = code;
    }

    /// How long execs report themselves as running.
    pub fn set_exec_duration(&self, duration: Duration) {
        self.lock().exec_duration = duration;
    }

    /// Output streamed by every exec.
    pub fn set_exec_output(&self, output: Vec<OutputChunk>) {
        self.lock().exec_output = output;
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Number of calls matching a predicate.
    pub fn count_calls(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of `watch_events` subscriptions opened so far.
    pub fn watch_count(&self) -> usize {
        self.count_calls(|call| matches!(call, RuntimeCall::WatchEvents))
    }

    /// Deliver an event to every open subscription.
    pub fn emit(&self, event: ContainerEvent) {
        self.lock()
            .subscribers
            .retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
    }

    /// Fail every open subscription with `error` and close it.
    pub fn break_event_streams(&self, error: RuntimeError) {
        for tx in self.lock().subscribers.drain(..) {
            let _ = tx.unbounded_send(Err(error.clone()));
        }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::ListContainers);
        Ok(state
            .containers
            .iter()
            .filter(|(_, labels)| filter.matches(labels))
            .map(|(id, labels)| ContainerInfo::new(id.clone(), labels.clone()))
            .collect())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::InspectContainer(id.clone()));
        state
            .containers
            .get(id)
            .map(|labels| ContainerInfo::new(id.clone(), labels.clone()))
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    fn watch_events(&self, _filter: &ContainerFilter) -> EventStream {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.lock();
        state.calls.push(RuntimeCall::WatchEvents);
        state.subscribers.push(tx);
        rx.boxed()
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        let delay = self.record(RuntimeCall::Start(id.clone()))?;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        grace: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let delay = self.record(RuntimeCall::Stop(id.clone(), grace))?;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn restart_container(
        &self,
        id: &ContainerId,
        grace: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let delay = self.record(RuntimeCall::Restart(id.clone(), grace))?;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn kill_container(&self, id: &ContainerId, signal: &str) -> Result<(), RuntimeError> {
        let delay = self.record(RuntimeCall::Kill(id.clone(), signal.to_string()))?;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn create_exec(
        &self,
        id: &ContainerId,
        command: &[String],
    ) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::CreateExec(id.clone(), command.to_vec()))?;
        let mut state = self.lock();
        state.next_exec += 1;
        Ok(format!("exec-{}", state.next_exec))
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput, RuntimeError> {
        self.record(RuntimeCall::StartExec(exec_id.to_string()))?;
        let mut state = self.lock();
        state.exec_started.insert(exec_id.to_string(), Instant::now());
        let output: Vec<Result<OutputChunk, RuntimeError>> =
            state.exec_output.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(output).boxed())
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus, RuntimeError> {
        self.record(RuntimeCall::InspectExec(exec_id.to_string()))?;
        let state = self.lock();
        let started = state
            .exec_started
            .get(exec_id)
            .ok_or_else(|| RuntimeError::NotFound(exec_id.to_string()))?;

        if started.elapsed() < state.exec_duration {
            Ok(ExecStatus {
                running: true,
                exit_code: None,
            })
        } else {
            Ok(ExecStatus {
                running: false,
                exit_code: Some(state.exec_exit_code),
            })
        }
    }
}

/// An output sink that keeps everything written to it.
#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<(ContainerId, OutputChunk)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All chunks received, in order.
    pub fn chunks(&self) -> Vec<(ContainerId, OutputChunk)> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn collect(&self, stream: OutputStream) -> String {
        let bytes: Vec<u8> = self
            .chunks()
            .into_iter()
            .filter(|(_, chunk)| chunk.stream == stream)
            .flat_map(|(_, chunk)| chunk.data)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Everything written to stdout.
    pub fn stdout(&self) -> String {
        self.collect(OutputStream::Stdout)
    }

    /// Everything written to stderr.
    pub fn stderr(&self) -> String {
        self.collect(OutputStream::Stderr)
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn write(&self, container: &ContainerId, chunk: &OutputChunk) {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((container.clone(), chunk.clone()));
    }
}

/// An event handler that keeps every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received, in order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Number of events matching a predicate.
    pub async fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
