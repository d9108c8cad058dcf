//! Container label grammar.
//!
//! Jobs are declared entirely through container labels under a fixed prefix:
//!
//! ```text
//! cronify.<job>.schedule                  cron expression
//! cronify.<job>.<field>                   primary action field
//! cronify.<job>.<trigger>.<field>         hook field, index "default"
//! cronify.<job>.<trigger>.<index>.<field> hook field
//! ```
//!
//! `<trigger>` is `success` or `fail`. Fields are `type`, `wait`, `signal`,
//! `command`, `timeout` and `container`.
//!
//! Every label is applied independently. A bad label is reported and skipped;
//! it never prevents the remaining labels from being parsed.
//!
//! ```
//! use std::collections::HashMap;
//! use cronify::{ActionKind, ContainerId, parse_jobs};
//!
//! let labels = HashMap::from([
//!     ("cronify.backup.schedule".to_string(), "0 3 * * *".to_string()),
//!     ("cronify.backup.type".to_string(), "exec".to_string()),
//!     ("cronify.backup.command".to_string(), "pg_dump -f /backup/db.sql".to_string()),
//! ]);
//!
//! let jobs = parse_jobs(&labels, &ContainerId::new("c1"));
//! let backup = &jobs["backup"];
//! assert_eq!(backup.primary.kind, Some(ActionKind::Exec));
//! assert_eq!(backup.primary.command, ["pg_dump", "-f", "/backup/db.sql"]);
//! ```

use std::collections::{BTreeMap, HashMap};

use super::duration::parse_duration;
use super::error::LabelError;
use crate::core::action::{ActionConfig, ActionKind};
use crate::core::job::{JobDefinition, Trigger};
use crate::core::types::ContainerId;

/// Default label prefix.
pub const DEFAULT_LABEL_PREFIX: &str = "cronify";

/// Segment separator inside label keys.
const DELIMITER: char = '.';

/// Field name that sets the job's cron expression.
const SCHEDULE_FIELD: &str = "schedule";

/// Hook index used by the four-part shorthand.
const DEFAULT_TRIGGER_INDEX: &str = "default";

/// Result of parsing one container's labels.
#[derive(Debug, Clone, Default)]
pub struct ParsedLabels {
    /// Jobs keyed by name.
    pub jobs: BTreeMap<String, JobDefinition>,
    /// Labels that were skipped, in the order they were seen.
    pub errors: Vec<LabelError>,
}

/// Parser for the label grammar.
#[derive(Debug, Clone)]
pub struct LabelParser {
    prefix: String,
}

impl Default for LabelParser {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_PREFIX)
    }
}

impl LabelParser {
    /// Create a parser for labels under `prefix` (without the trailing dot).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse all job definitions out of a container's labels.
    ///
    /// Keys outside the prefix are ignored. Label errors are logged and
    /// collected in [`ParsedLabels::errors`].
    pub fn parse(&self, labels: &HashMap<String, String>, owner: &ContainerId) -> ParsedLabels {
        let mut parsed = ParsedLabels::default();

        for (key, value) in labels {
            let Some(rest) = key
                .strip_prefix(self.prefix.as_str())
                .and_then(|rest| rest.strip_prefix(DELIMITER))
            else {
                continue;
            };

            if let Err(e) = self.apply(&mut parsed.jobs, key, rest, value, owner) {
                tracing::warn!(container = %owner.short(), label = %key, error = %e, "Skipping label");
                parsed.errors.push(e);
            }
        }

        parsed
    }

    fn apply(
        &self,
        jobs: &mut BTreeMap<String, JobDefinition>,
        key: &str,
        rest: &str,
        value: &str,
        owner: &ContainerId,
    ) -> Result<(), LabelError> {
        // rest = "<job>.<...>"; the prefix itself counts as the first part
        let parts: Vec<&str> = rest.split(DELIMITER).collect();
        if parts.len() < 2 {
            return Err(LabelError::UnknownLabel(key.to_string()));
        }

        // Any key deep enough to name a job declares it, even when the rest is unusable
        let job = jobs
            .entry(parts[0].to_string())
            .or_insert_with(|| JobDefinition::new(parts[0], owner.clone()));

        let (trigger, index, field) = match parts[..] {
            [_, field] => {
                if field == SCHEDULE_FIELD {
                    job.schedule = value.to_string();
                    return Ok(());
                }
                return apply_field(&mut job.primary, field, value);
            }
            [_, trigger, field] => (trigger, DEFAULT_TRIGGER_INDEX, field),
            [_, trigger, index, field] => (trigger, index, field),
            _ => return Err(LabelError::UnknownLabel(key.to_string())),
        };

        let trigger = Trigger::parse(trigger).ok_or_else(|| LabelError::UnknownTrigger {
            key: key.to_string(),
            trigger: trigger.to_string(),
        })?;

        let action = job
            .hooks_mut(trigger)
            .entry(index.to_string())
            .or_insert_with(|| ActionConfig::new(owner.clone()));

        apply_field(action, field, value)
    }
}

/// Parse job definitions using the default `cronify` prefix.
pub fn parse_jobs(
    labels: &HashMap<String, String>,
    owner: &ContainerId,
) -> BTreeMap<String, JobDefinition> {
    LabelParser::default().parse(labels, owner).jobs
}

/// Set one field of an action from a label value.
fn apply_field(action: &mut ActionConfig, field: &str, value: &str) -> Result<(), LabelError> {
    match field.to_lowercase().as_str() {
        "type" => {
            let kind = ActionKind::from_alias(value).ok_or_else(|| LabelError::InvalidType {
                key: field.to_string(),
                value: value.to_string(),
            })?;
            action.kind = Some(kind);
        }
        "wait" => {
            action.wait = match value.to_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    return Err(LabelError::InvalidBool {
                        key: field.to_string(),
                        value: value.to_string(),
                    });
                }
            };
        }
        "signal" => action.signal = Some(value.to_string()),
        "command" => action.command = parse_command(field, value)?,
        "timeout" => {
            action.timeout = parse_duration(value).map_err(|e| LabelError::InvalidDuration {
                key: field.to_string(),
                reason: e.to_string(),
            })?;
        }
        "container" => action.container = ContainerId::new(value),
        _ => return Err(LabelError::UnknownField(field.to_string())),
    }
    Ok(())
}

/// A command is either a JSON array of strings or a space separated string.
fn parse_command(field: &str, value: &str) -> Result<Vec<String>, LabelError> {
    if value.starts_with('[') {
        serde_json::from_str(value).map_err(|e| LabelError::InvalidCommand {
            key: field.to_string(),
            reason: e.to_string(),
        })
    } else {
        Ok(value.split(' ').map(String::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn owner() -> ContainerId {
        ContainerId::new("c1")
    }

    #[test]
    fn test_parse_exec_job_with_json_command() {
        let parsed = LabelParser::default().parse(
            &labels(&[
                ("cronify.backup.schedule", "* * * * *"),
                ("cronify.backup.type", "exec"),
                ("cronify.backup.command", r#"["sh","-c","echo hi"]"#),
            ]),
            &owner(),
        );

        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.jobs.len(), 1);

        let job = &parsed.jobs["backup"];
        assert_eq!(job.name, "backup");
        assert_eq!(job.owner, owner());
        assert_eq!(job.schedule, "* * * * *");
        assert_eq!(job.primary.kind, Some(ActionKind::Exec));
        assert_eq!(job.primary.command, ["sh", "-c", "echo hi"]);
        assert_eq!(job.primary.container, owner());
    }

    #[test]
    fn test_foreign_labels_are_ignored() {
        let parsed = LabelParser::default().parse(
            &labels(&[
                ("com.docker.compose.project", "demo"),
                ("cronify", "true"),
                ("cronifyx.job.type", "exec"),
                ("maintainer", "ops"),
            ]),
            &owner(),
        );

        assert!(parsed.jobs.is_empty());
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn test_four_part_key_uses_default_index() {
        let jobs = parse_jobs(
            &labels(&[
                ("cronify.j.schedule", "@hourly"),
                ("cronify.j.type", "start"),
                ("cronify.j.fail.type", "restart"),
            ]),
            &owner(),
        );

        let job = &jobs["j"];
        assert!(job.on_success.is_empty());
        let hook = &job.on_failure["default"];
        assert_eq!(hook.kind, Some(ActionKind::Restart));
        assert_eq!(hook.container, owner());
    }

    #[test]
    fn test_five_part_key_sets_named_hook() {
        let jobs = parse_jobs(
            &labels(&[
                ("cronify.j.schedule", "* * * * *"),
                ("cronify.j.type", "exec"),
                ("cronify.j.fail.default.type", "restart"),
                ("cronify.j.success.notify.type", "exec"),
                ("cronify.j.success.notify.container", "notifier"),
                ("cronify.j.success.notify.command", "curl -s http://hooks/ok"),
            ]),
            &owner(),
        );

        let job = &jobs["j"];
        assert_eq!(job.on_failure["default"].kind, Some(ActionKind::Restart));
        assert_eq!(job.on_failure["default"].container, owner());

        let notify = &job.on_success["notify"];
        assert_eq!(notify.kind, Some(ActionKind::Exec));
        assert_eq!(notify.container.as_str(), "notifier");
        assert_eq!(notify.command, ["curl", "-s", "http://hooks/ok"]);
    }

    #[test]
    fn test_trigger_is_case_insensitive() {
        let jobs = parse_jobs(
            &labels(&[("cronify.j.SUCCESS.type", "stop"), ("cronify.j.Fail.x.type", "kill")]),
            &owner(),
        );

        let job = &jobs["j"];
        assert_eq!(job.on_success["default"].kind, Some(ActionKind::Stop));
        assert_eq!(job.on_failure["x"].kind, Some(ActionKind::Kill));
    }

    #[test]
    fn test_unknown_trigger_is_reported() {
        let parsed =
            LabelParser::default().parse(&labels(&[("cronify.j.always.type", "stop")]), &owner());

        assert_eq!(
            parsed.errors,
            vec![LabelError::UnknownTrigger {
                key: "cronify.j.always.type".into(),
                trigger: "always".into(),
            }]
        );
        assert!(parsed.jobs["j"].on_success.is_empty());
        assert!(parsed.jobs["j"].on_failure.is_empty());
    }

    #[test]
    fn test_wrong_part_counts_are_reported() {
        let parsed = LabelParser::default().parse(
            &labels(&[
                ("cronify.j", "x"),
                ("cronify.j.fail.a.b.type", "stop"),
            ]),
            &owner(),
        );

        assert_eq!(parsed.errors.len(), 2);
        assert!(
            parsed
                .errors
                .iter()
                .all(|e| matches!(e, LabelError::UnknownLabel(_)))
        );
        // Too deep still names the job; too shallow does not
        assert_eq!(parsed.jobs.len(), 1);
        assert!(parsed.jobs["j"].schedule.is_empty());
        assert!(parsed.jobs["j"].on_failure.is_empty());
    }

    #[test]
    fn test_overlong_key_does_not_hide_job() {
        let parsed = LabelParser::default().parse(
            &labels(&[
                ("cronify.sweep.success.0.extra.type", "stop"),
                ("cronify.sweep.type", "start"),
            ]),
            &owner(),
        );

        assert_eq!(parsed.errors.len(), 1);
        assert!(matches!(
            &parsed.errors[0],
            LabelError::UnknownLabel(key) if key == "cronify.sweep.success.0.extra.type"
        ));
        assert_eq!(parsed.jobs.len(), 1);
        assert_eq!(parsed.jobs["sweep"].primary.kind, Some(ActionKind::Start));
        assert!(parsed.jobs["sweep"].on_success.is_empty());
    }

    #[test]
    fn test_invalid_timeout_keeps_default_and_continues() {
        let parsed = LabelParser::default().parse(
            &labels(&[
                ("cronify.j.schedule", "* * * * *"),
                ("cronify.j.type", "stop"),
                ("cronify.j.timeout", "not-a-duration"),
                ("cronify.j.signal", "SIGTERM"),
            ]),
            &owner(),
        );

        assert_eq!(parsed.errors.len(), 1);
        assert!(matches!(parsed.errors[0], LabelError::InvalidDuration { .. }));

        let job = &parsed.jobs["j"];
        assert_eq!(job.primary.timeout, Duration::ZERO);
        assert_eq!(job.primary.kind, Some(ActionKind::Stop));
        assert_eq!(job.primary.signal.as_deref(), Some("SIGTERM"));
        assert_eq!(job.schedule, "* * * * *");
    }

    #[test]
    fn test_valid_timeout() {
        let jobs = parse_jobs(&labels(&[("cronify.j.timeout", "1m30s")]), &owner());
        assert_eq!(jobs["j"].primary.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_invalid_type_is_reported() {
        let parsed =
            LabelParser::default().parse(&labels(&[("cronify.j.type", "pause")]), &owner());
        assert_eq!(
            parsed.errors,
            vec![LabelError::InvalidType {
                key: "type".into(),
                value: "pause".into(),
            }]
        );
        assert_eq!(parsed.jobs["j"].primary.kind, None);
    }

    #[test]
    fn test_wait_accepts_only_boolean_literals() {
        let jobs = parse_jobs(&labels(&[("cronify.a.wait", "TRUE")]), &owner());
        assert!(jobs["a"].primary.wait);

        let parsed = LabelParser::default().parse(&labels(&[("cronify.b.wait", "yes")]), &owner());
        assert!(matches!(parsed.errors[0], LabelError::InvalidBool { .. }));
        assert!(!parsed.jobs["b"].primary.wait);
    }

    #[test]
    fn test_malformed_json_command_is_reported() {
        let parsed = LabelParser::default()
            .parse(&labels(&[("cronify.j.command", r#"["sh", 1]"#)]), &owner());
        assert!(matches!(parsed.errors[0], LabelError::InvalidCommand { .. }));
        assert!(parsed.jobs["j"].primary.command.is_empty());
    }

    #[test]
    fn test_plain_command_splits_on_single_spaces() {
        let jobs = parse_jobs(&labels(&[("cronify.j.command", "echo  hi")]), &owner());
        assert_eq!(jobs["j"].primary.command, ["echo", "", "hi"]);
    }

    #[test]
    fn test_unknown_field_is_reported() {
        let parsed =
            LabelParser::default().parse(&labels(&[("cronify.j.retries", "3")]), &owner());
        assert_eq!(
            parsed.errors,
            vec![LabelError::UnknownField("retries".into())]
        );
    }

    #[test]
    fn test_container_overrides_primary_target() {
        let jobs = parse_jobs(
            &labels(&[("cronify.j.type", "restart"), ("cronify.j.container", "web")]),
            &owner(),
        );
        assert_eq!(jobs["j"].primary.container.as_str(), "web");
        assert_eq!(jobs["j"].owner, owner());
    }

    #[test]
    fn test_multiple_jobs_per_container() {
        let jobs = parse_jobs(
            &labels(&[
                ("cronify.a.schedule", "@daily"),
                ("cronify.a.type", "restart"),
                ("cronify.b.schedule", "@hourly"),
                ("cronify.b.type", "exec"),
                ("cronify.b.command", "true"),
            ]),
            &owner(),
        );
        assert_eq!(jobs.keys().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_custom_prefix() {
        let parser = LabelParser::new("ops.cron");
        let parsed = parser.parse(
            &labels(&[
                ("ops.cron.j.schedule", "@daily"),
                ("ops.cron.j.type", "stop"),
                ("cronify.other.type", "stop"),
            ]),
            &owner(),
        );
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.jobs.len(), 1);
        assert_eq!(parsed.jobs["j"].primary.kind, Some(ActionKind::Stop));
    }
}
