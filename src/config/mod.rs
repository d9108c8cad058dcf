//! Configuration loading and parsing.
//!
//! Jobs are configured through container labels ([`labels`]); the process
//! itself through an optional YAML file ([`GlobalConfig`]).

mod duration;
mod error;
mod global;
mod labels;

pub use duration::{DurationError, parse_duration};
pub use error::{ConfigError, LabelError};
pub use global::{DockerConfig, GlobalConfig, WatchConfig};
pub use labels::{DEFAULT_LABEL_PREFIX, LabelParser, ParsedLabels, parse_jobs};
