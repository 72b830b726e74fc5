//! Cron schedule evaluation.
//!
//! Stored expressions are standard 5-field cron. The evaluator accepts any
//! valid expression; the two product presets are just well-known inputs.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

/// Every day at 02:00 UTC.
pub const CRON_DAILY_2AM: &str = "0 2 * * *";
/// Every Sunday at 02:00 UTC.
pub const CRON_WEEKLY_SUNDAY_2AM: &str = "0 2 * * 0";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression {expression:?}: {source}")]
    Invalid {
        expression: String,
        source: cron::error::Error,
    },
    #[error("cron expression {0:?} has no future occurrence")]
    NoFutureOccurrence(String),
}

/// Rewrite numeric day-of-week ordinals from unix cron (0-6, 0 and 7 both
/// Sunday) to the 1-7 Sunday-first ordinals the parser expects. Step
/// divisors after `/` and out-of-range ordinals are left alone, so the
/// parser still rejects the latter.
fn translate_day_of_week(field: &str) -> String {
    let mut out = String::new();
    let mut digits = String::new();
    let mut in_step = false;

    fn flush(digits: &mut String, out: &mut String, in_step: bool) {
        if digits.is_empty() {
            return;
        }
        if in_step {
            out.push_str(digits);
        } else {
            match digits.parse::<u8>() {
                Ok(n) if n <= 7 => out.push_str(&((n % 7) + 1).to_string()),
                _ => out.push_str(digits),
            }
        }
        digits.clear();
    }

    for ch in field.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        flush(&mut digits, &mut out, in_step);
        in_step = ch == '/';
        out.push(ch);
    }
    flush(&mut digits, &mut out, in_step);
    out
}

/// Expand a 5-field expression to the parser's seconds-first form. 6- and
/// 7-field expressions pass through untouched.
fn to_parseable(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return expression.to_string();
    }
    let dow = translate_day_of_week(fields[4]);
    format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    )
}

/// Next occurrence of `expression` strictly after `now`.
pub fn next_due(expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule =
        Schedule::from_str(&to_parseable(expression)).map_err(|source| ScheduleError::Invalid {
            expression: expression.to_string(),
            source,
        })?;
    schedule
        .after(&now)
        .next()
        .ok_or_else(|| ScheduleError::NoFutureOccurrence(expression.to_string()))
}
