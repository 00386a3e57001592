/*!
 * Cron expression parsing
 *
 * A hand-written five-field parser (minute, hour, day-of-month, month,
 * day-of-week) supporting `*`, literals, ranges, lists, and steps. Both 0
 * and 7 mean Sunday in the day-of-week field.
 */

use std::collections::BTreeSet;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, Timelike};

use crate::error::{BallastError, Result};

/// One parsed field: the set of permitted values, plus whether the field
/// was written as `*` (unrestricted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    values: BTreeSet<u32>,
    unrestricted: bool,
}

impl CronField {
    pub fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }
}

/// A validated five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
    source: String,
}

impl CronExpression {
    /// Parse and validate an expression like `0 2 * * *`.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(BallastError::Cron(format!(
                "expected 5 fields, got {}: {}",
                fields.len(),
                expression
            )));
        }

        let minute = parse_field(fields[0], 0, 59)?;
        let hour = parse_field(fields[1], 0, 23)?;
        let day_of_month = parse_field(fields[2], 1, 31)?;
        let month = parse_field(fields[3], 1, 12)?;
        let day_of_week = parse_dow_field(fields[4])?;

        Ok(Self {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
            source: expression.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn matches_date(&self, dt: &NaiveDateTime) -> bool {
        if !self.month.matches(dt.month()) {
            return false;
        }
        let dom_ok = self.day_of_month.matches(dt.day());
        let dow_ok = self.day_of_week.matches(dt.weekday().num_days_from_sunday());
        // Classic cron: when both day fields are restricted, either may match
        match (
            self.day_of_month.is_unrestricted(),
            self.day_of_week.is_unrestricted(),
        ) {
            (false, false) => dom_ok || dow_ok,
            _ => dom_ok && dow_ok,
        }
    }

    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.matches_date(dt) && self.hour.matches(dt.hour()) && self.minute.matches(dt.minute())
    }

    /// Next datetime strictly after `after` that satisfies the expression,
    /// or None if no match occurs within the search horizon.
    pub fn next_fire_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        // Truncate to the next whole minute
        let mut candidate = after
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(ChronoDuration::minutes(1))?;

        // Four years bounds any satisfiable expression (leap days included)
        let horizon = after.checked_add_signed(ChronoDuration::days(366 * 4))?;
        while candidate <= horizon {
            if !self.matches_date(&candidate) {
                // Jump to the start of the next day
                candidate = (candidate + ChronoDuration::days(1))
                    .with_hour(0)?
                    .with_minute(0)?;
                continue;
            }
            if !self.hour.matches(candidate.hour()) {
                candidate = (candidate + ChronoDuration::hours(1)).with_minute(0)?;
                continue;
            }
            if !self.minute.matches(candidate.minute()) {
                candidate += ChronoDuration::minutes(1);
                continue;
            }
            return Some(candidate);
        }
        None
    }
}

/// True when `expression` parses cleanly.
pub fn is_valid(expression: &str) -> bool {
    CronExpression::parse(expression).is_ok()
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<CronField> {
    if field.is_empty() {
        return Err(BallastError::Cron("empty field".into()));
    }

    let mut values = BTreeSet::new();
    let unrestricted = field == "*";

    for part in field.split(',') {
        parse_element(part, min, max, &mut values)?;
    }

    Ok(CronField {
        values,
        unrestricted,
    })
}

/// One list element: `*`, a literal, `a-b`, or `base/step` with base in
/// {`*`, `a-b`}.
fn parse_element(part: &str, min: u32, max: u32, values: &mut BTreeSet<u32>) -> Result<()> {
    if part.is_empty() {
        return Err(BallastError::Cron("empty list element".into()));
    }

    let (base, step) = match part.split_once('/') {
        Some((base, step_str)) => {
            let step: u32 = step_str
                .parse()
                .map_err(|_| BallastError::Cron(format!("invalid step: {}", part)))?;
            if step == 0 {
                return Err(BallastError::Cron(format!("step must be >= 1: {}", part)));
            }
            if base != "*" && !base.contains('-') {
                return Err(BallastError::Cron(format!(
                    "step base must be '*' or a range: {}",
                    part
                )));
            }
            (base, step)
        }
        None => (part, 1),
    };

    let (start, end) = if base == "*" {
        (min, max)
    } else if let Some((a, b)) = base.split_once('-') {
        let a: u32 = a
            .parse()
            .map_err(|_| BallastError::Cron(format!("invalid range: {}", base)))?;
        let b: u32 = b
            .parse()
            .map_err(|_| BallastError::Cron(format!("invalid range: {}", base)))?;
        if a > b {
            return Err(BallastError::Cron(format!(
                "range start exceeds end: {}",
                base
            )));
        }
        (a, b)
    } else {
        let v: u32 = base
            .parse()
            .map_err(|_| BallastError::Cron(format!("invalid value: {}", base)))?;
        (v, v)
    };

    if start < min || end > max {
        return Err(BallastError::Cron(format!(
            "value out of range {}-{}: {}",
            min, max, part
        )));
    }

    let mut v = start;
    while v <= end {
        values.insert(v);
        v += step;
    }
    Ok(())
}

/// Day-of-week accepts 0-7 with 0 and 7 both meaning Sunday; stored values
/// are normalized to 0-6.
fn parse_dow_field(field: &str) -> Result<CronField> {
    let raw = parse_field(field, 0, 7)?;
    let values = raw.values.iter().map(|v| v % 7).collect();
    Ok(CronField {
        values,
        unrestricted: raw.unrestricted,
    })
}

/// `M H * * *` daily helper.
pub fn daily_expression(hour: u32, minute: u32) -> String {
    format!("{} {} * * *", minute, hour)
}

/// `M H * * D` weekly helper (0 = Sunday).
pub fn weekly_expression(day_of_week: u32, hour: u32, minute: u32) -> String {
    format!("{} {} * * {}", minute, hour, day_of_week)
}

/// `M H D * *` monthly helper.
pub fn monthly_expression(day_of_month: u32, hour: u32, minute: u32) -> String {
    format!("{} {} {} * *", minute, hour, day_of_month)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_accepts_valid_expressions() {
        assert!(is_valid("0 2 * * *"));
        assert!(is_valid("*/15 * * * *"));
        assert!(is_valid("0 9-17 * * 1-5"));
        assert!(is_valid("0 0 1 1 *"));
        assert!(is_valid("59 23 31 12 7"));
        assert!(is_valid("0,30 2,14 * * *"));
        assert!(is_valid("0-30/5 * * * *"));
    }

    #[test]
    fn test_rejects_invalid_expressions() {
        assert!(!is_valid("60 2 * * *"));
        assert!(!is_valid("0 25 * * *"));
        assert!(!is_valid("0 2 * * 8"));
        assert!(!is_valid("*/0 * * * *"));
        assert!(!is_valid("0 2 * *"));
        assert!(!is_valid("0 2 * * * *"));
        assert!(!is_valid("0 2 0 * *"));
        assert!(!is_valid("0 2 32 * *"));
        assert!(!is_valid("0 2 * 13 *"));
        assert!(!is_valid("5-2 * * * *"));
        assert!(!is_valid("abc * * * *"));
        assert!(!is_valid(""));
    }

    #[test]
    fn test_field_bounds_accepted() {
        assert!(is_valid("0 0 1 1 0"));
        assert!(is_valid("59 23 31 12 7"));
    }

    #[test]
    fn test_sunday_aliasing() {
        let zero = CronExpression::parse("0 2 * * 0").unwrap();
        let seven = CronExpression::parse("0 2 * * 7").unwrap();
        // 2024-01-07 is a Sunday
        let sunday = dt(2024, 1, 7, 2, 0);
        assert!(zero.matches(&sunday));
        assert!(seven.matches(&sunday));
    }

    #[test]
    fn test_next_fire_daily() {
        let expr = CronExpression::parse("0 2 * * *").unwrap();
        let next = expr.next_fire_after(dt(2024, 3, 10, 1, 30)).unwrap();
        assert_eq!(next, dt(2024, 3, 10, 2, 0));

        // Already past 02:00: next day
        let next = expr.next_fire_after(dt(2024, 3, 10, 2, 0)).unwrap();
        assert_eq!(next, dt(2024, 3, 11, 2, 0));
    }

    #[test]
    fn test_next_fire_step() {
        let expr = CronExpression::parse("*/15 * * * *").unwrap();
        let next = expr.next_fire_after(dt(2024, 3, 10, 9, 3)).unwrap();
        assert_eq!(next, dt(2024, 3, 10, 9, 15));

        let next = expr.next_fire_after(dt(2024, 3, 10, 9, 45)).unwrap();
        assert_eq!(next, dt(2024, 3, 10, 10, 0));
    }

    #[test]
    fn test_next_fire_weekday_window() {
        let expr = CronExpression::parse("0 9-17 * * 1-5").unwrap();
        // 2024-03-09 is a Saturday; next firing is Monday 09:00
        let next = expr.next_fire_after(dt(2024, 3, 9, 12, 0)).unwrap();
        assert_eq!(next, dt(2024, 3, 11, 9, 0));
        assert_eq!(next.weekday().num_days_from_sunday(), 1);
    }

    #[test]
    fn test_next_fire_monthly() {
        let expr = CronExpression::parse("30 4 1 * *").unwrap();
        let next = expr.next_fire_after(dt(2024, 1, 15, 0, 0)).unwrap();
        assert_eq!(next, dt(2024, 2, 1, 4, 30));
    }

    #[test]
    fn test_dom_dow_either_semantics() {
        // Both restricted: the 15th OR any Monday
        let expr = CronExpression::parse("0 0 15 * 1").unwrap();
        assert!(expr.matches(&dt(2024, 1, 15, 0, 0))); // a Monday and the 15th
        assert!(expr.matches(&dt(2024, 1, 8, 0, 0))); // a Monday, not the 15th
        assert!(expr.matches(&dt(2024, 2, 15, 0, 0))); // the 15th, a Thursday
        assert!(!expr.matches(&dt(2024, 1, 9, 0, 0))); // a Tuesday, not the 15th
    }

    #[test]
    fn test_helper_constructors() {
        assert_eq!(daily_expression(2, 0), "0 2 * * *");
        assert_eq!(weekly_expression(0, 3, 0), "0 3 * * 0");
        assert_eq!(monthly_expression(1, 4, 30), "30 4 1 * *");
        assert!(is_valid(&daily_expression(2, 0)));
        assert!(is_valid(&weekly_expression(0, 3, 0)));
        assert!(is_valid(&monthly_expression(1, 4, 30)));
    }
}
