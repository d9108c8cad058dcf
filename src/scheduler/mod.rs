//! Job scheduling.
//!
//! [`Scheduler`] keeps the job registry and runs the tick loop that launches
//! due jobs; [`SchedulerHandle`] controls a started loop.

mod engine;
mod handle;
mod run;
mod types;

pub use engine::{
    InFlightRun, ReplaceOutcome, Scheduler, SchedulerError, SchedulerHandle, SchedulerState,
};
