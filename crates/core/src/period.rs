//! Calendar bucketing for cohort periods. Periods are right-open and computed
//! on the naive wall clock of the source data.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    /// ISO weeks, starting Monday.
    Weekly,
    #[default]
    Monthly,
}

impl Period {
    /// First day of the period containing `date`.
    pub fn start_of_date(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Daily => date,
            Self::Weekly => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Self::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    pub fn start_of(&self, ts: NaiveDateTime) -> NaiveDate {
        self.start_of_date(ts.date())
    }

    /// Whole periods from the period of `from` to the period of `to`.
    /// Negative when `to` precedes `from`.
    pub fn offset_between(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        let from = self.start_of_date(from);
        let to = self.start_of_date(to);
        match self {
            Self::Daily => (to - from).num_days(),
            Self::Weekly => (to - from).num_days() / 7,
            Self::Monthly => {
                (to.year() as i64 - from.year() as i64) * 12 + to.month() as i64
                    - from.month() as i64
            }
        }
    }

    /// Start of the period `n` periods after the one containing `date`.
    pub fn advance(&self, date: NaiveDate, n: u32) -> NaiveDate {
        let start = self.start_of_date(date);
        match self {
            Self::Daily => start + Duration::days(n as i64),
            Self::Weekly => start + Duration::weeks(n as i64),
            Self::Monthly => {
                let months = start.month0() + n;
                let year = start.year() + (months / 12) as i32;
                NaiveDate::from_ymd_opt(year, months % 12 + 1, 1).unwrap_or(start)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            other => Err(format!("unknown period granularity '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_start_of_period() {
        // 2024-03-14 is a Thursday.
        assert_eq!(Period::Daily.start_of_date(date(2024, 3, 14)), date(2024, 3, 14));
        assert_eq!(Period::Weekly.start_of_date(date(2024, 3, 14)), date(2024, 3, 11));
        assert_eq!(Period::Monthly.start_of_date(date(2024, 3, 14)), date(2024, 3, 1));
    }

    #[test]
    fn test_monthly_offset_crosses_year() {
        assert_eq!(Period::Monthly.offset_between(date(2023, 11, 30), date(2024, 2, 1)), 3);
        assert_eq!(Period::Monthly.offset_between(date(2024, 2, 1), date(2024, 2, 29)), 0);
        assert_eq!(Period::Monthly.offset_between(date(2024, 2, 1), date(2024, 1, 31)), -1);
    }

    #[test]
    fn test_weekly_offset_uses_week_starts() {
        // Sunday to the following Monday is one week boundary.
        assert_eq!(Period::Weekly.offset_between(date(2024, 3, 17), date(2024, 3, 18)), 1);
        assert_eq!(Period::Weekly.offset_between(date(2024, 3, 11), date(2024, 3, 17)), 0);
    }

    #[test]
    fn test_advance() {
        assert_eq!(Period::Monthly.advance(date(2023, 11, 15), 3), date(2024, 2, 1));
        assert_eq!(Period::Weekly.advance(date(2024, 3, 14), 1), date(2024, 3, 18));
        assert_eq!(Period::Daily.advance(date(2024, 2, 28), 2), date(2024, 3, 1));
    }

    #[test]
    fn test_parse_period() {
        assert_eq!("Monthly".parse::<Period>().unwrap(), Period::Monthly);
        assert_eq!("week".parse::<Period>().unwrap(), Period::Weekly);
        assert!("quarterly".parse::<Period>().is_err());
    }
}
