//! Retention tag classification.
//!
//! Every run is labelled with exactly one tag. The tag decides which remote
//! slot the archive replaces, so a run on the first Sunday of January in an
//! even year lands in `2year` and nowhere else.

use chrono::{Datelike, NaiveDate, Weekday};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionTag {
    Daily,
    Weekly,
    Monthly,
    SixMonth,
    Yearly,
    TwoYear,
}

impl RetentionTag {
    pub const ALL: [RetentionTag; 6] = [
        RetentionTag::Daily,
        RetentionTag::Weekly,
        RetentionTag::Monthly,
        RetentionTag::SixMonth,
        RetentionTag::Yearly,
        RetentionTag::TwoYear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionTag::Daily => "daily",
            RetentionTag::Weekly => "weekly",
            RetentionTag::Monthly => "monthly",
            RetentionTag::SixMonth => "6month",
            RetentionTag::Yearly => "yearly",
            RetentionTag::TwoYear => "2year",
        }
    }

    /// Prefix carried by every remote object holding this tag.
    pub fn remote_prefix(&self) -> String {
        format!("{}_", self.as_str())
    }
}

impl fmt::Display for RetentionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn first_week(date: &NaiveDate) -> bool {
    (1..=7).contains(&date.day())
}

/// Checked in order; the first predicate that holds wins.
const RULES: &[(fn(&NaiveDate) -> bool, RetentionTag)] = &[
    (
        |d: &NaiveDate| first_week(d) && d.month() == 1 && d.year() % 2 == 0,
        RetentionTag::TwoYear,
    ),
    (|d: &NaiveDate| first_week(d) && d.month() == 1, RetentionTag::Yearly),
    (
        |d: &NaiveDate| first_week(d) && (d.month() == 1 || d.month() == 7),
        RetentionTag::SixMonth,
    ),
    (first_week, RetentionTag::Monthly),
    (|d: &NaiveDate| d.weekday() == Weekday::Sun, RetentionTag::Weekly),
];

/// Classify a calendar date. Falls back to `daily`.
pub fn classify(date: NaiveDate) -> RetentionTag {
    RULES
        .iter()
        .find(|(matches, _)| matches(&date))
        .map(|(_, tag)| *tag)
        .unwrap_or(RetentionTag::Daily)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_even_new_year_is_two_year() {
        // 2026-01-01 is a Thursday; every tier matches.
        assert_eq!(classify(date(2026, 1, 1)), RetentionTag::TwoYear);
        assert_eq!(classify(date(2024, 1, 7)), RetentionTag::TwoYear);
    }

    #[test]
    fn test_odd_new_year_is_yearly() {
        assert_eq!(classify(date(2027, 1, 3)), RetentionTag::Yearly);
    }

    #[test]
    fn test_july_first_week_is_six_month() {
        assert_eq!(classify(date(2026, 7, 5)), RetentionTag::SixMonth);
    }

    #[test]
    fn test_first_week_of_month_is_monthly() {
        // 2026-03-01 is a Sunday: month start outranks weekly.
        assert_eq!(classify(date(2026, 3, 1)), RetentionTag::Monthly);
        assert_eq!(classify(date(2026, 10, 7)), RetentionTag::Monthly);
    }

    #[test]
    fn test_sunday_is_weekly() {
        assert_eq!(classify(date(2026, 10, 18)), RetentionTag::Weekly);
    }

    #[test]
    fn test_plain_weekday_is_daily() {
        assert_eq!(classify(date(2026, 10, 19)), RetentionTag::Daily);
        assert_eq!(classify(date(2026, 1, 8)), RetentionTag::Daily);
    }

    #[test]
    fn test_every_day_classifies() {
        let mut day = date(2027, 1, 1);
        let mut seen = std::collections::HashSet::new();
        while day.year() <= 2028 {
            let tag = classify(day);
            assert!(RetentionTag::ALL.contains(&tag));
            seen.insert(tag);
            day = day.succ_opt().unwrap();
        }
        assert_eq!(seen.len(), RetentionTag::ALL.len());
    }

    #[test]
    fn test_remote_prefix() {
        assert_eq!(RetentionTag::SixMonth.remote_prefix(), "6month_");
        assert_eq!(RetentionTag::TwoYear.to_string(), "2year");
    }
}
