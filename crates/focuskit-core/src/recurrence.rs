//! Recurrence rules and next-occurrence expansion.
//!
//! [`next`] is a pure function: given a rule, the date an occurrence
//! completed on, and how many occurrences the caller has materialized so
//! far, it yields the next date or `None` once the rule's end condition
//! cuts the series off. The caller (task store / reminder scheduler) owns
//! the occurrence counter and is the only place that turns a returned
//! date into a new row.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Bounded set of weekdays, 0 = Sunday .. 6 = Saturday.
///
/// Replaces a loosely-typed weekday array: invalid day numbers are
/// rejected on construction and the set can never exceed seven entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);

    /// Build a set from day numbers. Fails on anything outside 0..=6.
    pub fn from_days(days: &[u8]) -> Result<Self, ValidationError> {
        let mut set = WeekdaySet(0);
        for &day in days {
            if day > 6 {
                return Err(ValidationError::InvalidValue {
                    field: "days_of_week",
                    message: format!("weekday {day} is outside 0..=6"),
                });
            }
            set.0 |= 1 << day;
        }
        Ok(set)
    }

    pub fn contains(&self, day: u8) -> bool {
        day <= 6 && self.0 & (1 << day) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Day numbers in ascending order.
    pub fn days(&self) -> Vec<u8> {
        (0..=6).filter(|d| self.contains(*d)).collect()
    }
}

impl TryFrom<Vec<u8>> for WeekdaySet {
    type Error = ValidationError;

    fn try_from(days: Vec<u8>) -> Result<Self, Self::Error> {
        WeekdaySet::from_days(&days)
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(set: WeekdaySet) -> Self {
        set.days()
    }
}

/// How a task or reminder repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    /// User-defined day cycle. Steps by `interval` days like `daily`,
    /// but keeps its own tag so clients can distinguish it.
    Custom,
}

/// When a series stops. Exactly one end condition can be in effect,
/// which the enum encodes by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceEnd {
    /// Unbounded series.
    Never,
    /// No occurrence may fall after this date.
    Until { date: NaiveDate },
    /// At most this many occurrences are ever materialized.
    MaxOccurrences { count: u32 },
}

/// A recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub pattern: RecurrencePattern,
    /// Cycle length in pattern units. Always positive.
    pub interval: u32,
    /// Required for `weekly`, rejected otherwise.
    #[serde(default)]
    pub days_of_week: Option<WeekdaySet>,
    /// Required for `monthly` (1..=31), rejected otherwise.
    #[serde(default)]
    pub day_of_month: Option<u8>,
    #[serde(default = "RecurrenceRule::default_end")]
    pub end: RecurrenceEnd,
}

impl RecurrenceRule {
    fn default_end() -> RecurrenceEnd {
        RecurrenceEnd::Never
    }

    pub fn daily(interval: u32) -> Self {
        Self {
            pattern: RecurrencePattern::Daily,
            interval,
            days_of_week: None,
            day_of_month: None,
            end: RecurrenceEnd::Never,
        }
    }

    pub fn weekly(interval: u32, days: WeekdaySet) -> Self {
        Self {
            pattern: RecurrencePattern::Weekly,
            interval,
            days_of_week: Some(days),
            day_of_month: None,
            end: RecurrenceEnd::Never,
        }
    }

    pub fn monthly(interval: u32, day_of_month: u8) -> Self {
        Self {
            pattern: RecurrencePattern::Monthly,
            interval,
            days_of_week: None,
            day_of_month: Some(day_of_month),
            end: RecurrenceEnd::Never,
        }
    }

    pub fn with_end(mut self, end: RecurrenceEnd) -> Self {
        self.end = end;
        self
    }

    /// Structural validation. Run before a rule is accepted on any
    /// task or reminder.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval == 0 {
            return Err(ValidationError::InvalidValue {
                field: "interval",
                message: "interval must be positive".into(),
            });
        }
        match self.pattern {
            RecurrencePattern::Weekly => match self.days_of_week {
                Some(days) if !days.is_empty() => {}
                _ => {
                    return Err(ValidationError::InvalidValue {
                        field: "days_of_week",
                        message: "weekly rules require at least one weekday".into(),
                    })
                }
            },
            RecurrencePattern::Monthly => match self.day_of_month {
                Some(day) if (1..=31).contains(&day) => {}
                Some(day) => {
                    return Err(ValidationError::InvalidValue {
                        field: "day_of_month",
                        message: format!("day {day} is outside 1..=31"),
                    })
                }
                None => {
                    return Err(ValidationError::InvalidValue {
                        field: "day_of_month",
                        message: "monthly rules require a day of month".into(),
                    })
                }
            },
            RecurrencePattern::Daily | RecurrencePattern::Custom => {
                if self.days_of_week.is_some() || self.day_of_month.is_some() {
                    return Err(ValidationError::InvalidValue {
                        field: "pattern",
                        message: "day selectors are only valid for weekly/monthly rules".into(),
                    });
                }
            }
        }
        if let RecurrenceEnd::MaxOccurrences { count } = self.end {
            if count == 0 {
                return Err(ValidationError::InvalidValue {
                    field: "end",
                    message: "max occurrences must be positive".into(),
                });
            }
        }
        Ok(())
    }
}

/// Next occurrence on/after the day following `from`, or `None` once the
/// end condition is reached.
///
/// `generated_so_far` is the number of occurrences the caller has already
/// materialized for this series; a `MaxOccurrences` cap compares against
/// it before any date arithmetic.
pub fn next(rule: &RecurrenceRule, from: NaiveDate, generated_so_far: u32) -> Option<NaiveDate> {
    if let RecurrenceEnd::MaxOccurrences { count } = rule.end {
        if generated_so_far >= count {
            return None;
        }
    }

    let candidate = match rule.pattern {
        RecurrencePattern::Daily | RecurrencePattern::Custom => {
            from + Duration::days(i64::from(rule.interval))
        }
        RecurrencePattern::Weekly => next_weekly(rule, from)?,
        RecurrencePattern::Monthly => next_monthly(rule, from)?,
    };

    if let RecurrenceEnd::Until { date } = rule.end {
        if candidate > date {
            return None;
        }
    }
    Some(candidate)
}

/// Next date strictly after `from` whose weekday is in the set. Once the
/// days remaining in `from`'s week are exhausted, the series jumps
/// `interval` weeks forward and picks the first selected weekday there.
fn next_weekly(rule: &RecurrenceRule, from: NaiveDate) -> Option<NaiveDate> {
    let days = rule.days_of_week.filter(|d| !d.is_empty())?;
    let week_start = from - Duration::days(i64::from(from.weekday().num_days_from_sunday()));

    // Remainder of the current week first.
    let mut day = from + Duration::days(1);
    while day < week_start + Duration::days(7) {
        if days.contains(day.weekday().num_days_from_sunday() as u8) {
            return Some(day);
        }
        day += Duration::days(1);
    }

    // Cycle exhausted: step whole weeks.
    let next_week = week_start + Duration::weeks(i64::from(rule.interval));
    (0..7)
        .map(|offset| next_week + Duration::days(offset))
        .find(|d| days.contains(d.weekday().num_days_from_sunday() as u8))
}

/// Same day-of-month, `interval` months later, clamped to the last valid
/// day when the target month is shorter.
fn next_monthly(rule: &RecurrenceRule, from: NaiveDate) -> Option<NaiveDate> {
    let dom = u32::from(rule.day_of_month?);
    let months = from.year() * 12 + from.month0() as i32 + rule.interval as i32;
    let year = months.div_euclid(12);
    let month = months.rem_euclid(12) as u32 + 1;
    let day = dom.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    (28..=31)
        .rev()
        .find(|&d| NaiveDate::from_ymd_opt(year, month, d).is_some())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekday_set_rejects_out_of_range() {
        assert!(WeekdaySet::from_days(&[0, 6]).is_ok());
        assert!(WeekdaySet::from_days(&[7]).is_err());
    }

    #[test]
    fn weekday_set_roundtrip() {
        let set = WeekdaySet::from_days(&[1, 3, 5]).unwrap();
        assert_eq!(set.days(), vec![1, 3, 5]);
        assert_eq!(set.len(), 3);
        assert!(set.contains(3));
        assert!(!set.contains(0));
    }

    #[test]
    fn daily_steps_by_interval() {
        let rule = RecurrenceRule::daily(3);
        assert_eq!(
            next(&rule, date(2026, 3, 10), 0),
            Some(date(2026, 3, 13))
        );
    }

    #[test]
    fn custom_behaves_like_daily() {
        let rule = RecurrenceRule {
            pattern: RecurrencePattern::Custom,
            ..RecurrenceRule::daily(10)
        };
        assert_eq!(next(&rule, date(2026, 1, 1), 0), Some(date(2026, 1, 11)));
    }

    #[test]
    fn weekly_monday_yields_following_wednesday() {
        // days [1, 3] = Monday and Wednesday.
        let rule = RecurrenceRule::weekly(1, WeekdaySet::from_days(&[1, 3]).unwrap());
        // 2026-03-09 is a Monday.
        assert_eq!(next(&rule, date(2026, 3, 9), 0), Some(date(2026, 3, 11)));
    }

    #[test]
    fn weekly_cycle_exhausted_steps_interval_weeks() {
        // Wednesday is the last selected day of the week; from there a
        // 2-week rule jumps to the Monday two weeks after this week.
        let rule = RecurrenceRule::weekly(2, WeekdaySet::from_days(&[1, 3]).unwrap());
        // 2026-03-11 is a Wednesday; its week starts Sunday 2026-03-08.
        assert_eq!(next(&rule, date(2026, 3, 11), 0), Some(date(2026, 3, 23)));
    }

    #[test]
    fn weekly_saturday_stays_in_current_cycle() {
        // Sunday-based weeks: from a Friday, a Saturday selection is
        // still part of the current week.
        let rule = RecurrenceRule::weekly(4, WeekdaySet::from_days(&[6]).unwrap());
        // 2026-03-13 is a Friday.
        assert_eq!(next(&rule, date(2026, 3, 13), 0), Some(date(2026, 3, 14)));
    }

    #[test]
    fn monthly_clamps_to_short_month() {
        let rule = RecurrenceRule::monthly(1, 31);
        assert_eq!(next(&rule, date(2026, 1, 31), 0), Some(date(2026, 2, 28)));
        // Leap year clamps to the 29th.
        assert_eq!(next(&rule, date(2028, 1, 31), 0), Some(date(2028, 2, 29)));
    }

    #[test]
    fn monthly_crosses_year_boundary() {
        let rule = RecurrenceRule::monthly(2, 15);
        assert_eq!(next(&rule, date(2026, 11, 15), 0), Some(date(2027, 1, 15)));
    }

    #[test]
    fn until_date_cuts_off_series() {
        let rule = RecurrenceRule::daily(7).with_end(RecurrenceEnd::Until {
            date: date(2026, 3, 20),
        });
        assert_eq!(next(&rule, date(2026, 3, 10), 0), Some(date(2026, 3, 17)));
        assert_eq!(next(&rule, date(2026, 3, 17), 1), None);
    }

    #[test]
    fn max_occurrences_caps_series() {
        let rule = RecurrenceRule::daily(1).with_end(RecurrenceEnd::MaxOccurrences { count: 2 });
        assert!(next(&rule, date(2026, 3, 10), 0).is_some());
        assert!(next(&rule, date(2026, 3, 11), 1).is_some());
        assert_eq!(next(&rule, date(2026, 3, 12), 2), None);
    }

    #[test]
    fn validate_weekly_requires_days() {
        let mut rule = RecurrenceRule::weekly(1, WeekdaySet::EMPTY);
        assert!(rule.validate().is_err());
        rule.days_of_week = Some(WeekdaySet::from_days(&[2]).unwrap());
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn validate_monthly_day_bounds() {
        assert!(RecurrenceRule::monthly(1, 0).validate().is_err());
        assert!(RecurrenceRule::monthly(1, 32).validate().is_err());
        assert!(RecurrenceRule::monthly(1, 31).validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        assert!(RecurrenceRule::daily(0).validate().is_err());
    }

    #[test]
    fn validate_rejects_misplaced_selectors() {
        let rule = RecurrenceRule {
            days_of_week: Some(WeekdaySet::from_days(&[1]).unwrap()),
            ..RecurrenceRule::daily(1)
        };
        assert!(rule.validate().is_err());
    }
}
