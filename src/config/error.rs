//! Configuration error types.
//!
//! [`ConfigError`] covers the process configuration file. [`LabelError`]
//! covers individual container labels; those are never fatal and are only
//! reported.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading the process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a specific file with context.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Failed to parse YAML from a specific file.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A single container label that could not be applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LabelError {
    /// The key has the prefix but not a recognized shape.
    #[error("ignoring unknown label: {0}")]
    UnknownLabel(String),

    /// The trigger segment is neither `success` nor `fail`.
    #[error("unknown trigger '{trigger}' in label {key}")]
    UnknownTrigger { key: String, trigger: String },

    /// The field name is not one of the recognized fields.
    #[error("unknown config label given: {0}")]
    UnknownField(String),

    /// The `type` value is not a known action kind.
    #[error("invalid job type given '{key}': '{value}'")]
    InvalidType { key: String, value: String },

    /// The `wait` value is not a boolean literal.
    #[error("invalid boolean given for '{key}': '{value}'")]
    InvalidBool { key: String, value: String },

    /// The `command` value looks like JSON but is not an array of strings.
    #[error("could not parse json array from label '{key}': {reason}")]
    InvalidCommand { key: String, reason: String },

    /// The `timeout` value is not a duration literal.
    #[error("could not parse duration from label '{key}': {reason}")]
    InvalidDuration { key: String, reason: String },
}
