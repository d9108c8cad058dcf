//! Duration literals for the `timeout` label.
//!
//! Accepts the familiar `300ms`, `1.5h`, `2h45m` format: one or more decimal
//! numbers, each with an optional fraction and a mandatory unit suffix.

use std::time::Duration;
use thiserror::Error;

/// A duration literal that could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationError {
    input: String,
    reason: &'static str,
}

impl DurationError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

const NANOS_PER_UNIT: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("μs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 3_600 * 1_000_000_000),
];

/// Parse a duration literal such as `30s`, `1m30s` or `1.5h`.
///
/// A bare `0` is accepted. Negative values are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let mut rest = input.strip_prefix('+').unwrap_or(input);
    if rest.starts_with('-') {
        return Err(DurationError::new(input, "negative durations are not allowed"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(DurationError::new(input, "empty duration"));
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_number) = match after_int.strip_prefix('.') {
            Some(after_dot) => {
                let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
                after_dot.split_at(frac_len)
            }
            None => ("", after_int),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(DurationError::new(input, "expected a number"));
        }

        let unit_len = after_number
            .char_indices()
            .find(|(_, c)| *c == '.' || c.is_ascii_digit())
            .map(|(idx, _)| idx)
            .unwrap_or(after_number.len());
        let (unit, remaining) = after_number.split_at(unit_len);
        if unit.is_empty() {
            return Err(DurationError::new(input, "missing unit"));
        }

        let scale = NANOS_PER_UNIT
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| DurationError::new(input, "unknown unit"))?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| DurationError::new(input, "number out of range"))?
        };

        let mut value = whole
            .checked_mul(scale)
            .ok_or_else(|| DurationError::new(input, "duration out of range"))?;

        // Fractions beyond nanosecond precision are truncated
        let mut divisor: u128 = 1;
        for digit in frac_part.bytes() {
            divisor *= 10;
            if divisor > scale {
                break;
            }
            value += u128::from(digit - b'0') * scale / divisor;
        }

        total = total
            .checked_add(value)
            .ok_or_else(|| DurationError::new(input, "duration out of range"))?;
        rest = remaining;
    }

    let secs = u64::try_from(total / 1_000_000_000)
        .map_err(|_| DurationError::new(input, "duration out of range"))?;
    // remainder is always below one second
    let nanos = (total % 1_000_000_000) as u32;
    Ok(Duration::new(secs, nanos))
}
