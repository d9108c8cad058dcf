//! Schedule parsing and next occurrence calculation.
//!
//! Supports standard 5-field cron expressions, extended 6-field cron (with
//! seconds) and the usual shortcuts (`@daily`, `@hourly`, ...). Evaluation is
//! delegated to the `cron` crate; this module only normalizes the expression
//! into the form that crate expects.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

impl ScheduleError {
    fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed cron schedule bound to a timezone.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// Timezone the expression is evaluated in.
    timezone: Tz,
    /// Parsed schedule.
    cron: Box<CronSchedule>,
}

impl Schedule {
    /// Parse a schedule evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
    ///   `@midnight`, `@hourly`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Parse a schedule evaluated in the given IANA timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: &str,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;

        let cron = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            cron: Box::new(cron),
        })
    }

    fn parse_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::invalid(expression, "empty expression"));
        }

        if trimmed.starts_with('@') {
            let expanded = match trimmed.to_lowercase().as_str() {
                "@yearly" | "@annually" => "0 0 1 1 *",
                "@monthly" => "0 0 1 * *",
                "@weekly" => "0 0 * * 0",
                "@daily" | "@midnight" => "0 0 * * *",
                "@hourly" => "0 * * * *",
                _ => return Err(ScheduleError::invalid(expression, "unknown shortcut")),
            };
            return Self::parse_fields(expression, expanded);
        }

        Self::parse_fields(expression, trimmed)
    }

    fn parse_fields(original: &str, expression: &str) -> Result<CronSchedule, ScheduleError> {
        let mut fields: Vec<String> = expression.split_whitespace().map(String::from).collect();

        match fields.len() {
            // minute-resolution cron fires at second zero
            5 => fields.insert(0, "0".to_string()),
            6 => {}
            n => {
                return Err(ScheduleError::invalid(
                    original,
                    format!("expected 5 or 6 fields, got {}", n),
                ));
            }
        }

        fields[5] = normalize_day_of_week(&fields[5])
            .ok_or_else(|| ScheduleError::invalid(original, "invalid day-of-week field"))?;

        CronSchedule::from_str(&fields.join(" "))
            .map_err(|e| ScheduleError::invalid(original, e.to_string()))
    }

    /// Get the next occurrence strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let local_time = after.with_timezone(&self.timezone);
        self.cron
            .after(&local_time)
            .next()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or(ScheduleError::NoMoreOccurrences)
    }

    /// Get the next N occurrences after the given time.
    pub fn next_n_after(&self, after: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let local_time = after.with_timezone(&self.timezone);
        self.cron
            .after(&local_time)
            .take(n)
            .map(|dt| dt.with_timezone(&Utc))
            .collect()
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone name.
    pub fn timezone(&self) -> &str {
        self.timezone.name()
    }
}

/// Rewrite numeric weekdays (0-7, Sunday = 0 or 7) into names.
///
/// The `cron` crate numbers weekdays 1-7 starting on Sunday, while crontab
/// uses 0-6. Names are unambiguous for both, so numbers are translated.
/// Step values after `/` are left untouched.
fn normalize_day_of_week(field: &str) -> Option<String> {
    const NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

    let translate = |part: &str| -> Option<String> {
        if part.chars().all(|c| c.is_ascii_digit()) && !part.is_empty() {
            let day: usize = part.parse().ok()?;
            NAMES.get(day).map(|name| name.to_string())
        } else {
            Some(part.to_string())
        }
    };

    let mut items = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };

        let base = match base.split_once('-') {
            Some((from, to)) => {
                let from = translate(from)?;
                // "5-7" means Friday through Sunday; SUN as a range end would wrap
                if to == "7" {
                    let range = format!("{}-SAT", from);
                    items.push(match step {
                        Some(step) => format!("{}/{}", range, step),
                        None => range,
                    });
                    items.push("SUN".to_string());
                    continue;
                }
                format!("{}-{}", from, translate(to)?)
            }
            None => translate(base)?,
        };

        items.push(match step {
            Some(step) => format!("{}/{}", base, step),
            None => base,
        });
    }

    Some(items.join(","))
}
