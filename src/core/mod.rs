//! Core domain types: identifiers, schedules, actions and jobs.

pub mod action;
pub mod job;
pub mod schedule;
pub mod types;
