//! Schedule string grammar: POSIX five-field cron and `HH:MM` shorthand.
//!
//! Both forms normalize to the same internal representation. All times are
//! UTC unless a schedule declares otherwise upstream. Supported cron field
//! syntax: `*`, lists (`a,b`), ranges (`a-b`), and steps (`*/n`, `a-b/n`).
//! Day-of-month and day-of-week follow POSIX semantics: when both are
//! restricted, a day matching either fires.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum CronParseError {
    #[error("expected 5 cron fields or an HH:MM list, got {0:?}")]
    #[diagnostic(
        code(agentloom::cron::shape),
        help("Examples: \"0 9,18 * * *\" or \"09:00,18:00\".")
    )]
    Shape(String),

    #[error("invalid field {field}: {detail}")]
    #[diagnostic(code(agentloom::cron::field))]
    Field { field: &'static str, detail: String },

    #[error("invalid time {0:?}: expected HH:MM")]
    #[diagnostic(code(agentloom::cron::time))]
    Time(String),

    #[error("field {field} produced no values")]
    #[diagnostic(code(agentloom::cron::empty))]
    Empty { field: &'static str },
}

/// One normalized cron expression: sorted, deduplicated value sets per field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronExpr {
    minutes: Vec<u8>,
    hours: Vec<u8>,
    days_of_month: Vec<u8>,
    months: Vec<u8>,
    days_of_week: Vec<u8>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse a five-field POSIX cron expression.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::Shape(expr.to_string()));
        }
        let minutes = parse_field(fields[0], 0, 59, "minute")?;
        let hours = parse_field(fields[1], 0, 23, "hour")?;
        let days_of_month = parse_field(fields[2], 1, 31, "day-of-month")?;
        let months = parse_field(fields[3], 1, 12, "month")?;
        let mut days_of_week = parse_field(fields[4], 0, 7, "day-of-week")?;
        // POSIX allows 7 for Sunday; normalize onto 0.
        for d in &mut days_of_week {
            if *d == 7 {
                *d = 0;
            }
        }
        days_of_week.sort_unstable();
        days_of_week.dedup();
        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// A daily firing at the given hour and minute.
    pub fn daily_at(hour: u8, minute: u8) -> Result<Self, CronParseError> {
        if hour > 23 || minute > 59 {
            return Err(CronParseError::Time(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self {
            minutes: vec![minute],
            hours: vec![hour],
            days_of_month: (1..=31).collect(),
            months: (1..=12).collect(),
            days_of_week: (0..=6).collect(),
            dom_restricted: false,
            dow_restricted: false,
        })
    }

    fn day_matches(&self, date: chrono::NaiveDate) -> bool {
        if !self.months.contains(&(date.month() as u8)) {
            return false;
        }
        let dom_ok = self.days_of_month.contains(&(date.day() as u8));
        let dow_ok = self
            .days_of_week
            .contains(&(date.weekday().num_days_from_sunday() as u8));
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }

    /// The first fire time strictly after `after`.
    ///
    /// Returns `None` only for expressions that can never fire within the
    /// four-year search horizon (e.g. `0 0 30 2 *`).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after + ChronoDuration::minutes(1);
        let start = start
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(start);

        let mut date = start.date_naive();
        for offset in 0..(366 * 4) {
            if self.day_matches(date) {
                let after_time = if offset == 0 {
                    Some(start.time())
                } else {
                    None
                };
                for &hour in &self.hours {
                    for &minute in &self.minutes {
                        let candidate = date
                            .and_hms_opt(u32::from(hour), u32::from(minute), 0)
                            .map(|naive| Utc.from_utc_datetime(&naive))?;
                        if let Some(floor) = after_time {
                            if candidate.time() < floor {
                                continue;
                            }
                        }
                        return Some(candidate);
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

fn parse_field(
    field: &str,
    min: u8,
    max: u8,
    name: &'static str,
) -> Result<Vec<u8>, CronParseError> {
    let mut values = Vec::new();
    for atom in field.split(',') {
        let (range_part, step) = match atom.split_once('/') {
            Some((range, step)) => {
                let step: u8 = step.parse().map_err(|_| CronParseError::Field {
                    field: name,
                    detail: format!("bad step in {atom:?}"),
                })?;
                if step == 0 {
                    return Err(CronParseError::Field {
                        field: name,
                        detail: "step must be positive".into(),
                    });
                }
                (range, step)
            }
            None => (atom, 1),
        };

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a: u8 = a.parse().map_err(|_| CronParseError::Field {
                field: name,
                detail: format!("bad range start in {atom:?}"),
            })?;
            let b: u8 = b.parse().map_err(|_| CronParseError::Field {
                field: name,
                detail: format!("bad range end in {atom:?}"),
            })?;
            if a > b {
                return Err(CronParseError::Field {
                    field: name,
                    detail: format!("inverted range in {atom:?}"),
                });
            }
            (a, b)
        } else {
            let v: u8 = range_part.parse().map_err(|_| CronParseError::Field {
                field: name,
                detail: format!("bad value in {atom:?}"),
            })?;
            (v, v)
        };

        if lo < min || hi > max {
            return Err(CronParseError::Field {
                field: name,
                detail: format!("{atom:?} outside {min}-{max}"),
            });
        }
        let mut v = lo;
        while v <= hi {
            values.push(v);
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }
    if values.is_empty() {
        return Err(CronParseError::Empty { field: name });
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

/// A parsed schedule specification: one or more cron expressions plus the
/// original source string for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleSpec {
    exprs: Vec<CronExpr>,
    source: String,
}

impl ScheduleSpec {
    /// Accepts either a five-field cron expression or a comma-separated
    /// `HH:MM` list (daily firings, UTC). Both normalize to [`CronExpr`]s.
    pub fn parse(spec: &str) -> Result<Self, CronParseError> {
        let trimmed = spec.trim();
        if trimmed.split_whitespace().count() == 5 {
            return Ok(Self {
                exprs: vec![CronExpr::parse(trimmed)?],
                source: trimmed.to_string(),
            });
        }
        // HH:MM shorthand.
        let mut exprs = Vec::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            let (h, m) = part
                .split_once(':')
                .ok_or_else(|| CronParseError::Time(part.to_string()))?;
            let hour: u8 = h.parse().map_err(|_| CronParseError::Time(part.to_string()))?;
            let minute: u8 = m.parse().map_err(|_| CronParseError::Time(part.to_string()))?;
            exprs.push(CronExpr::daily_at(hour, minute)?);
        }
        if exprs.is_empty() {
            return Err(CronParseError::Shape(spec.to_string()));
        }
        Ok(Self {
            exprs,
            source: trimmed.to_string(),
        })
    }

    /// Original text this spec was parsed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Earliest next fire across all expressions, strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.exprs
            .iter()
            .filter_map(|e| e.next_after(after))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, 0)
                .unwrap(),
        )
    }

    #[test]
    fn parses_wildcards_and_lists() {
        let expr = CronExpr::parse("0 9,18 * * *").unwrap();
        assert_eq!(expr.next_after(at(2025, 1, 3, 8, 0)), Some(at(2025, 1, 3, 9, 0)));
        assert_eq!(expr.next_after(at(2025, 1, 3, 9, 0)), Some(at(2025, 1, 3, 18, 0)));
        assert_eq!(expr.next_after(at(2025, 1, 3, 18, 0)), Some(at(2025, 1, 4, 9, 0)));
    }

    #[test]
    fn parses_steps_and_ranges() {
        let expr = CronExpr::parse("*/15 8-10 * * *").unwrap();
        assert_eq!(
            expr.next_after(at(2025, 1, 3, 8, 10)),
            Some(at(2025, 1, 3, 8, 15))
        );
        assert_eq!(
            expr.next_after(at(2025, 1, 3, 10, 45)),
            Some(at(2025, 1, 4, 8, 0))
        );
    }

    #[test]
    fn dow_seven_is_sunday() {
        let with_seven = CronExpr::parse("0 12 * * 7").unwrap();
        let with_zero = CronExpr::parse("0 12 * * 0").unwrap();
        // 2025-01-05 is a Sunday.
        assert_eq!(
            with_seven.next_after(at(2025, 1, 3, 0, 0)),
            Some(at(2025, 1, 5, 12, 0))
        );
        assert_eq!(
            with_seven.next_after(at(2025, 1, 3, 0, 0)),
            with_zero.next_after(at(2025, 1, 3, 0, 0))
        );
    }

    #[test]
    fn dom_and_dow_match_either_when_both_restricted() {
        // POSIX: fires on the 15th OR on Mondays.
        let expr = CronExpr::parse("0 0 15 * 1").unwrap();
        // 2025-01-06 is a Monday, before the 15th.
        assert_eq!(
            expr.next_after(at(2025, 1, 4, 0, 0)),
            Some(at(2025, 1, 6, 0, 0))
        );
        // After that Monday the 13th (also Monday) comes before the 15th.
        assert_eq!(
            expr.next_after(at(2025, 1, 6, 0, 0)),
            Some(at(2025, 1, 13, 0, 0))
        );
    }

    #[test]
    fn rejects_malformed_fields() {
        assert!(CronExpr::parse("60 * * * *").is_err());
        assert!(CronExpr::parse("* 24 * * *").is_err());
        assert!(CronExpr::parse("* * 0 * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-1 * * * *").is_err());
        assert!(CronExpr::parse("* * * *").is_err());
    }

    #[test]
    fn impossible_dates_return_none() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert_eq!(expr.next_after(at(2025, 1, 1, 0, 0)), None);
    }

    #[test]
    fn shorthand_matches_equivalent_cron() {
        let shorthand = ScheduleSpec::parse("09:00,18:00").unwrap();
        let cron = ScheduleSpec::parse("0 9,18 * * *").unwrap();
        let mut t = at(2025, 6, 1, 0, 0);
        for _ in 0..6 {
            let next = shorthand.next_after(t);
            assert_eq!(next, cron.next_after(t));
            t = next.unwrap();
        }
        assert_eq!(
            shorthand.next_after(at(2025, 6, 1, 0, 0)),
            Some(at(2025, 6, 1, 9, 0))
        );
    }

    #[test]
    fn shorthand_rejects_bad_times() {
        assert!(ScheduleSpec::parse("25:00").is_err());
        assert!(ScheduleSpec::parse("09:61").is_err());
        assert!(ScheduleSpec::parse("someday").is_err());
    }

    #[test]
    fn fire_times_strictly_increase() {
        let spec = ScheduleSpec::parse("*/5 * * * *").unwrap();
        let mut t = at(2025, 1, 1, 0, 0);
        for _ in 0..100 {
            let next = spec.next_after(t).unwrap();
            assert!(next > t);
            t = next;
        }
    }
}
