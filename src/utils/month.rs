use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

/// A calendar month as addressed by `YYYY-MM` path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn parse(raw: &str) -> Result<YearMonth, AppError> {
        let invalid = || AppError::BadRequest("Invalid month format. Expected YYYY-MM".to_string());

        let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if year.len() != 4 || month.is_empty() || month.len() > 2 || !digits(year) || !digits(month) {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;

        // Rejects month 0 and 13+.
        NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        Ok(YearMonth { year, month })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn days_in_month(&self) -> u32 {
        self.last_day().day()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl FromStr for YearMonth {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        YearMonth::parse(s)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_months() {
        let ym = YearMonth::parse("2024-05").unwrap();
        assert_eq!(ym, YearMonth { year: 2024, month: 5 });
        assert_eq!(ym.to_string(), "2024-05");
        assert_eq!(YearMonth::parse("2024-5").unwrap().month, 5);
    }

    #[test]
    fn rejects_out_of_range_and_malformed_months() {
        let malformed = [
            "2024-13", "2024-00", "2024", "24-01", "2024-1a", "2024-05-01", "", "abcd-ef",
            "+024-05", "2024-+5", "-024-05", "2024- 5",
        ];
        for raw in malformed {
            assert!(
                matches!(YearMonth::parse(raw), Err(AppError::BadRequest(_))),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn resolves_month_boundaries() {
        let feb_leap = YearMonth::parse("2024-02").unwrap();
        assert_eq!(feb_leap.days_in_month(), 29);
        assert_eq!(feb_leap.first_day(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(feb_leap.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        assert_eq!(YearMonth::parse("2023-02").unwrap().days_in_month(), 28);
        assert_eq!(YearMonth::parse("2024-04").unwrap().days_in_month(), 30);

        let december = YearMonth::parse("2024-12").unwrap();
        assert_eq!(december.last_day(), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[test]
    fn contains_only_dates_of_that_month() {
        let ym = YearMonth::parse("2024-06").unwrap();
        assert!(ym.contains(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()));
        assert!(!ym.contains(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
    }
}
