//! Calendar-month arithmetic
//!
//! Recurring billing reasons in whole calendar months. A [`YearMonth`] is the
//! natural key of an occurrence, and [`YearMonth::clamp_day`] turns a rule's
//! `day_of_month` into a concrete date (31 becomes 30 in April, 29 or 28 in
//! February).

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors related to calendar operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Invalid month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },

    #[error("Day of month must be between 1 and 31, got {0}")]
    InvalidDayOfMonth(u32),

    #[error("Month arithmetic out of range")]
    OutOfRange,

    #[error("Cannot parse '{0}' as YYYY-MM")]
    Parse(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Returns the number of days in the given month
///
/// The day before the first of the following month; 31 for a month chrono
/// cannot represent.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month >= 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

/// A calendar month (`YYYY-MM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, CalendarError> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(CalendarError::InvalidMonth { year, month });
        }
        Ok(Self { year, month })
    }

    /// The month containing `date`
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn days(&self) -> u32 {
        days_in_month(self.year, self.month)
    }

    pub fn first_day(&self) -> NaiveDate {
        self.clamp_day(1)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.clamp_day(31)
    }

    /// Date for `day_of_month` in this month, clamped to the month's last day
    pub fn clamp_day(&self, day_of_month: u32) -> NaiveDate {
        let day = day_of_month.clamp(1, self.days());
        // Built from a validated (year, month) pair, so day 1 always exists.
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default();
        first + Days::new(u64::from(day - 1))
    }

    /// Shifts by a signed number of months
    pub fn add_months(&self, months: i64) -> Result<Self, CalendarError> {
        let index = self.index().checked_add(months).ok_or(CalendarError::OutOfRange)?;
        let year = i32::try_from(index.div_euclid(12)).map_err(|_| CalendarError::OutOfRange)?;
        let month = index.rem_euclid(12) as u32 + 1;
        Self::new(year, month).map_err(|_| CalendarError::OutOfRange)
    }

    pub fn succ(&self) -> Result<Self, CalendarError> {
        self.add_months(1)
    }

    /// Signed month distance `other - self`
    pub fn months_until(&self, other: YearMonth) -> i64 {
        other.index() - self.index()
    }

    /// Iterates every month in `[self, to]`; empty if `to < self`
    pub fn through(self, to: YearMonth) -> MonthRange {
        MonthRange {
            next: Some(self).filter(|m| *m <= to),
            end: to,
        }
    }

    fn index(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month - 1)
    }
}

/// Inclusive iterator over calendar months
#[derive(Debug, Clone)]
pub struct MonthRange {
    next: Option<YearMonth>,
    end: YearMonth,
}

impl Iterator for MonthRange {
    type Item = YearMonth;

    fn next(&mut self) -> Option<YearMonth> {
        let current = self.next?;
        self.next = current.succ().ok().filter(|m| *m <= self.end);
        Some(current)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| CalendarError::Parse(s.to_string()))?;
        let year = year.parse().map_err(|_| CalendarError::Parse(s.to_string()))?;
        let month = month.parse().map_err(|_| CalendarError::Parse(s.to_string()))?;
        Self::new(year, month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Timezone wrapper used to decide what "today" and "this month" mean
///
/// Wraps chrono_tz::Tz with serialization as the IANA name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timezone(pub Tz);

impl Timezone {
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Local calendar date of a UTC instant
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.0).date_naive()
    }

    /// Local calendar month of a UTC instant
    pub fn current_month(&self, at: DateTime<Utc>) -> YearMonth {
        YearMonth::from_date(self.local_date(at))
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self(chrono_tz::UTC)
    }
}

impl FromStr for Timezone {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tz::from_str(s.trim())
            .map(Timezone)
            .map_err(|_| CalendarError::UnknownTimezone(s.to_string()))
    }
}

impl Serialize for Timezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    #[test]
    fn test_day_31_clamps_per_month() {
        let dates: Vec<NaiveDate> = ym(2024, 1)
            .through(ym(2024, 4))
            .map(|m| m.clamp_day(31))
            .collect();

        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 4, 30).unwrap(),
            ]
        );
    }

    #[test]
    fn test_february_non_leap() {
        assert_eq!(ym(2023, 2).last_day(), NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());
        assert_eq!(ym(2100, 2).days(), 28);
        assert_eq!(ym(2000, 2).days(), 29);
    }

    #[test]
    fn test_days_in_month_across_year_end() {
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(2024, 11), 30);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(1900, 2), 28);
    }

    #[test]
    fn test_add_months_crosses_years() {
        assert_eq!(ym(2024, 11).add_months(3).unwrap(), ym(2025, 2));
        assert_eq!(ym(2024, 1).add_months(-1).unwrap(), ym(2023, 12));
        assert_eq!(ym(2024, 1).months_until(ym(2025, 3)), 14);
        assert_eq!(ym(2025, 3).months_until(ym(2024, 1)), -14);
    }

    #[test]
    fn test_through_is_inclusive_and_empty_when_reversed() {
        assert_eq!(ym(2024, 12).through(ym(2025, 2)).count(), 3);
        assert_eq!(ym(2025, 2).through(ym(2024, 12)).count(), 0);
        assert_eq!(ym(2025, 2).through(ym(2025, 2)).count(), 1);
    }

    #[test]
    fn test_parse_and_display() {
        let month: YearMonth = "2024-03".parse().unwrap();
        assert_eq!(month, ym(2024, 3));
        assert_eq!(month.to_string(), "2024-03");
        assert!("2024-13".parse::<YearMonth>().is_err());
        assert!("march".parse::<YearMonth>().is_err());
    }

    #[test]
    fn test_current_month_follows_timezone() {
        // 23:30 UTC on Jan 31 is already February in Paris.
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 23, 30, 0).unwrap();
        let paris: Timezone = "Europe/Paris".parse().unwrap();

        assert_eq!(Timezone::default().current_month(at), ym(2024, 1));
        assert_eq!(paris.current_month(at), ym(2024, 2));
        assert!("Mars/Olympus".parse::<Timezone>().is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn clamped_day_stays_in_month(
            year in 1900i32..2200i32,
            month in 1u32..=12u32,
            day in 1u32..=31u32
        ) {
            let m = YearMonth::new(year, month).unwrap();
            let date = m.clamp_day(day);
            prop_assert_eq!(YearMonth::from_date(date), m);
            prop_assert!(date.day() <= day);
        }

        #[test]
        fn add_months_inverts(
            year in 1900i32..2200i32,
            month in 1u32..=12u32,
            delta in -600i64..600i64
        ) {
            let m = YearMonth::new(year, month).unwrap();
            let shifted = m.add_months(delta).unwrap();
            prop_assert_eq!(m.months_until(shifted), delta);
            prop_assert_eq!(shifted.add_months(-delta).unwrap(), m);
        }
    }
}
