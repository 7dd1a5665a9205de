//! Five-field cron expressions
//!
//! Evaluates `minute hour day-of-month month day-of-week` expressions.
//! Every field supports `*`, `*/N`, `A-B`, comma lists and single values.
//! All functions here are pure: no clock reads, no shared state.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::SchedulerError;

/// How far `next_run_after` searches before giving up (365 days of minutes).
pub const SEARCH_WINDOW_MINUTES: u32 = 525_600;

/// Position of a field within the expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    const ALL: [FieldKind; 5] = [
        FieldKind::Minute,
        FieldKind::Hour,
        FieldKind::DayOfMonth,
        FieldKind::Month,
        FieldKind::DayOfWeek,
    ];

    /// Inclusive bounds of the field. Day-of-week 0 is Sunday.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (0, 6),
        }
    }

    fn label(self) -> &'static str {
        match self {
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why an expression was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{token}'")]
    InvalidField { field: FieldKind, token: String },
}

/// One parsed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    /// `*`
    Any,
    /// `*/N`: matches when `value % N == 0`
    Every(u32),
    /// `A-B`, inclusive
    Range(u32, u32),
    /// `A,B,C`
    List(Vec<u32>),
    /// `A`
    Exact(u32),
}

impl CronField {
    fn parse(token: &str, kind: FieldKind) -> Result<Self, CronError> {
        let (min, max) = kind.bounds();
        let invalid = || CronError::InvalidField {
            field: kind,
            token: token.to_string(),
        };
        let in_bounds = |value: u32| value >= min && value <= max;

        if token == "*" {
            return Ok(CronField::Any);
        }

        if let Some(step) = token.strip_prefix("*/") {
            let step = parse_number(step).ok_or_else(invalid)?;
            if step == 0 || step > max {
                return Err(invalid());
            }
            return Ok(CronField::Every(step));
        }

        if token.contains(',') {
            let mut values = Vec::new();
            for item in token.split(',') {
                let value = parse_number(item).ok_or_else(invalid)?;
                if !in_bounds(value) {
                    return Err(invalid());
                }
                values.push(value);
            }
            return Ok(CronField::List(values));
        }

        if let Some((start, end)) = token.split_once('-') {
            let start = parse_number(start).ok_or_else(invalid)?;
            let end = parse_number(end).ok_or_else(invalid)?;
            if !in_bounds(start) || !in_bounds(end) || start >= end {
                return Err(invalid());
            }
            return Ok(CronField::Range(start, end));
        }

        let value = parse_number(token).ok_or_else(invalid)?;
        if !in_bounds(value) {
            return Err(invalid());
        }
        Ok(CronField::Exact(value))
    }

    /// Whether `value` satisfies this field.
    pub fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Every(step) => value % step == 0,
            CronField::Range(start, end) => value >= *start && value <= *end,
            CronField::List(values) => values.contains(&value),
            CronField::Exact(expected) => value == *expected,
        }
    }
}

fn parse_number(token: &str) -> Option<u32> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// A validated cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    fields: [CronField; 5],
}

impl CronExpression {
    /// The expression with runs of whitespace collapsed to single spaces.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn field(&self, kind: FieldKind) -> &CronField {
        &self.fields[kind as usize]
    }

    /// True when every field matches the instant (seconds are ignored).
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        let values = [
            at.minute(),
            at.hour(),
            at.day(),
            at.month(),
            at.weekday().num_days_from_sunday(),
        ];
        self.fields
            .iter()
            .zip(values)
            .all(|(field, value)| field.matches(value))
    }

    /// First matching minute strictly after `from`, scanning at most
    /// [`SEARCH_WINDOW_MINUTES`] candidates.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = Duration::minutes(1);
        let mut candidate = truncate_to_minute(from) + step;
        for _ in 0..SEARCH_WINDOW_MINUTES {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += step;
        }
        None
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = expr.split_whitespace().collect();
        if tokens.len() != 5 {
            return Err(CronError::FieldCount(tokens.len()));
        }

        let mut fields = Vec::with_capacity(5);
        for (token, kind) in tokens.iter().zip(FieldKind::ALL) {
            fields.push(CronField::parse(token, kind)?);
        }
        let fields: [CronField; 5] = fields
            .try_into()
            .map_err(|_| CronError::FieldCount(tokens.len()))?;

        Ok(Self {
            source: tokens.join(" "),
            fields,
        })
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at - Duration::seconds(i64::from(at.second())) - Duration::nanoseconds(i64::from(at.nanosecond()))
}

/// Parse an expression, mapping failures into the boundary error type.
pub fn parse(expr: &str) -> crate::error::Result<CronExpression> {
    expr.parse().map_err(|source| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        source,
    })
}

pub fn is_valid(expr: &str) -> bool {
    expr.parse::<CronExpression>().is_ok()
}

/// Next run strictly after `from`, or `None` for malformed expressions and
/// expressions with no occurrence inside the search window.
pub fn next_run_after(expr: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    expr.parse::<CronExpression>().ok()?.next_after(from)
}

/// Human-readable summary for display. Never use it for scheduling.
pub fn describe(expr: &str) -> String {
    let Ok(parsed) = expr.parse::<CronExpression>() else {
        return "Invalid cron expression".to_string();
    };
    let tokens: Vec<&str> = parsed.as_str().split(' ').collect();
    let (minute, hour) = (tokens[0], tokens[1]);
    let daily = tokens[2..].iter().all(|t| *t == "*");

    if daily {
        match (minute, hour) {
            ("*", "*") => return "Every minute".to_string(),
            ("0", "*") => return "Every hour".to_string(),
            ("0", "0") => return "Daily at midnight".to_string(),
            _ => {}
        }
        if hour == "*" {
            if let Some(n) = minute.strip_prefix("*/") {
                return format!("Every {n} minutes");
            }
        }
        if minute == "0" {
            if let Some(n) = hour.strip_prefix("*/") {
                return format!("Every {n} hours");
            }
        }
        if let (Some(m), Some(h)) = (parse_number(minute), parse_number(hour)) {
            return format!("Daily at {h}:{m:02}");
        }
    }

    format!("At cron expression: {parsed}")
}
