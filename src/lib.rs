//! cronify - cron-style container lifecycle actions declared through labels.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod orchestrator;
pub mod runtime;
pub mod scheduler;
pub mod testing;

pub use config::{
    ConfigError, DockerConfig, GlobalConfig, LabelError, LabelParser, ParsedLabels, WatchConfig,
    parse_duration, parse_jobs,
};
pub use core::action::{ActionConfig, ActionKind, DEFAULT_KILL_SIGNAL};
pub use core::job::{Job, JobDefinition, JobError, JobSnapshot, JobState, Trigger};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::types::{ContainerId, RunId};
pub use events::{ActionPhase, Event, EventBus, EventHandler};
pub use execution::{
    ActionError, ActionExecutor, ActionResult, NullSink, OutputSink, StdoutSink,
};
pub use orchestrator::{Orchestrator, SyncReport};
pub use runtime::{
    ContainerEvent, ContainerEventAction, ContainerFilter, ContainerInfo, ContainerRuntime,
    DockerRuntime, RuntimeError,
};
pub use scheduler::{
    InFlightRun, ReplaceOutcome, Scheduler, SchedulerError, SchedulerHandle, SchedulerState,
};
