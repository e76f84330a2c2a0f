//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Field syntax: *, */N, N, N,M,...
//! DOW: 0-7 where both 0 and 7 are Sunday.
//! Examples: "0 2 * * *" = daily at 02:00, "0 8 * * 1" = Mondays at 08:00.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Whether the expression parses as a valid 5-field cron spec.
pub fn validate(expression: &str) -> bool {
    parse(expression).is_some()
}

struct CronSpec {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
}

fn parse(expression: &str) -> Option<CronSpec> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return None;
    }
    Some(CronSpec {
        minutes: parse_field(parts[0], 0, 59)?,
        hours: parse_field(parts[1], 0, 23)?,
        days_of_month: parse_field(parts[2], 1, 31)?,
        months: parse_field(parts[3], 1, 12)?,
        // 7 normalizes to 0 below.
        days_of_week: parse_field(parts[4], 0, 7)?
            .into_iter()
            .map(|d| d % 7)
            .collect(),
    })
}

/// Parse a simple cron expression and compute the next run time after `after`.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let spec = match parse(expression) {
        Some(s) => s,
        None => {
            tracing::warn!(
                "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
                expression
            );
            return None;
        }
    };

    let mut candidate = (after + Duration::minutes(1))
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(after);

    // Minute-step up to 366 days ahead; covers yearly DOM/month combinations.
    for _ in 0..(366 * 24 * 60) {
        if spec.minutes.contains(&candidate.minute())
            && spec.hours.contains(&candidate.hour())
            && spec.days_of_month.contains(&candidate.day())
            && spec.months.contains(&candidate.month())
            && spec
                .days_of_week
                .contains(&candidate.weekday().num_days_from_sunday())
        {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }

    None
}

/// Parse a cron field into a list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        let vals: Result<Vec<u32>, _> = field.split(',').map(|s| s.trim().parse()).collect();
        let vals = vals.ok()?;
        if vals.iter().any(|v| *v < min || *v > max) {
            return None;
        }
        return Some(vals);
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max { Some(vec![n]) } else { None }
}
