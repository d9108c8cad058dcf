//! Action execution.
//!
//! This module turns resolved actions into container runtime calls and
//! forwards exec output to an [`OutputSink`].

mod action;
mod output;

pub use action::{ActionError, ActionExecutor, ActionResult, DEFAULT_EXEC_POLL_INTERVAL};
pub use output::{NullSink, OutputSink, StdoutSink};
