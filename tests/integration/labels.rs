//! Label parsing integration tests.
//!
//! Tests that complete label sets, as a container would carry them,
//! resolve into schedulable job definitions.

use crate::common::labels;
use cronify::{
    ActionKind, ContainerId, LabelError, LabelParser, Schedule, Trigger, parse_jobs,
};
use std::time::Duration;

#[test]
fn test_database_backup_job() {
    let owner = ContainerId::new("db-container");
    let jobs = parse_jobs(
        &labels(&[
            ("cronify", "true"),
            ("cronify.backup.schedule", "0 30 2 * * *"),
            ("cronify.backup.type", "exec"),
            (
                "cronify.backup.command",
                r#"["sh", "-c", "pg_dump app > /backup/app.sql"]"#,
            ),
            ("cronify.backup.timeout", "15m"),
            ("cronify.backup.success.type", "restart"),
            ("cronify.backup.success.container", "proxy"),
            ("cronify.backup.fail.0.type", "exec"),
            ("cronify.backup.fail.0.command", "notify --channel ops"),
            ("cronify.backup.fail.1.type", "signal"),
            ("cronify.backup.fail.1.signal", "SIGHUP"),
        ]),
        &owner,
    );

    assert_eq!(jobs.len(), 1);
    let backup = &jobs["backup"];
    assert_eq!(backup.owner, owner);
    assert_eq!(backup.schedule, "0 30 2 * * *");

    assert_eq!(backup.primary.kind, Some(ActionKind::Exec));
    assert_eq!(backup.primary.container, owner);
    assert_eq!(
        backup.primary.command,
        ["sh", "-c", "pg_dump app > /backup/app.sql"]
    );
    assert_eq!(backup.primary.timeout(), Some(Duration::from_secs(900)));

    let on_success = backup.hooks(Trigger::Success);
    assert_eq!(on_success.len(), 1);
    assert_eq!(on_success["default"].kind, Some(ActionKind::Restart));
    assert_eq!(on_success["default"].container, ContainerId::new("proxy"));

    let on_failure: Vec<&String> = backup.hooks(Trigger::Fail).keys().collect();
    assert_eq!(on_failure, ["0", "1"]);
    let notify = &backup.hooks(Trigger::Fail)["0"];
    assert_eq!(notify.command, ["notify", "--channel", "ops"]);
    assert_eq!(notify.container, owner);
    let hup = &backup.hooks(Trigger::Fail)["1"];
    assert_eq!(hup.kind, Some(ActionKind::Kill));
    assert_eq!(hup.signal_or_default(), "SIGHUP");

    assert!(Schedule::new(backup.schedule.as_str()).is_ok());
}

#[test]
fn test_several_jobs_on_one_container() {
    let owner = ContainerId::new("worker");
    let jobs = parse_jobs(
        &labels(&[
            ("cronify.rotate.schedule", "@daily"),
            ("cronify.rotate.type", "kill"),
            ("cronify.rotate.signal", "SIGUSR1"),
            ("cronify.nightly.schedule", "0 4 * * 1-5"),
            ("cronify.nightly.type", "restart"),
            ("cronify.nightly.timeout", "30s"),
            ("unrelated.label", "ignored"),
        ]),
        &owner,
    );

    let names: Vec<&String> = jobs.keys().collect();
    assert_eq!(names, ["nightly", "rotate"]);
    assert_eq!(jobs["rotate"].primary.signal.as_deref(), Some("SIGUSR1"));
    assert_eq!(
        jobs["nightly"].primary.timeout(),
        Some(Duration::from_secs(30))
    );

    for job in jobs.values() {
        assert!(
            Schedule::new(job.schedule.as_str()).is_ok(),
            "schedule for {} should parse",
            job.name
        );
    }
}

#[test]
fn test_bad_labels_do_not_hide_good_ones() {
    let owner = ContainerId::new("app");
    let parsed = LabelParser::default().parse(
        &labels(&[
            ("cronify.job.schedule", "@hourly"),
            ("cronify.job.type", "restart"),
            ("cronify.job.wait", "sometimes"),
            ("cronify.job.retries", "3"),
            ("cronify.job.later.type", "start"),
            ("cronify.job.success.0.timeout", "soon"),
        ]),
        &owner,
    );

    assert_eq!(parsed.jobs.len(), 1);
    let job = &parsed.jobs["job"];
    assert_eq!(job.schedule, "@hourly");
    assert_eq!(job.primary.kind, Some(ActionKind::Restart));
    assert!(!job.primary.wait);

    assert_eq!(parsed.errors.len(), 4);
    assert!(
        parsed
            .errors
            .iter()
            .any(|e| matches!(e, LabelError::InvalidBool { value, .. } if value == "sometimes"))
    );
    assert!(
        parsed
            .errors
            .iter()
            .any(|e| matches!(e, LabelError::UnknownField(field) if field == "retries"))
    );
    assert!(
        parsed
            .errors
            .iter()
            .any(|e| matches!(e, LabelError::UnknownTrigger { trigger, .. } if trigger == "later"))
    );
    assert!(
        parsed
            .errors
            .iter()
            .any(|e| matches!(e, LabelError::InvalidDuration { .. }))
    );
}

#[test]
fn test_custom_prefix() {
    let owner = ContainerId::new("app");
    let all = labels(&[
        ("acme.cron.job.schedule", "@weekly"),
        ("acme.cron.job.type", "stop"),
        ("cronify.other.schedule", "@daily"),
    ]);

    let parsed = LabelParser::new("acme.cron").parse(&all, &owner);

    // A dotted prefix leaves the remaining segments intact
    assert!(parsed.errors.is_empty());
    let names: Vec<&String> = parsed.jobs.keys().collect();
    assert_eq!(names, ["job"]);
    assert_eq!(parsed.jobs["job"].primary.kind, Some(ActionKind::Stop));
}
