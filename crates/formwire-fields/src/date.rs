#![forbid(unsafe_code)]

//! Month/day/year entry and date bounds.

use std::fmt;

use time::{Date, Month};

/// Days in `month` (1-12). An unknown year allows February 29.
///
/// Months outside 1-12 are treated like 31-day months so that the day check
/// does not mask the month error.
#[must_use]
pub fn days_in_month(month: u8, year: Option<i32>) -> u8 {
    match month {
        2 => match year {
            Some(year) if time::util::is_leap_year(year) => 29,
            Some(_) => 28,
            None => 29,
        },
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Returns `true` if `date` lies strictly between the given bounds.
#[must_use]
pub fn within_exclusive(date: Date, min: Option<Date>, max: Option<Date>) -> bool {
    min.is_none_or(|min| date > min) && max.is_none_or(|max| date < max)
}

/// The three separately typed parts of a date input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateParts {
    pub month: Option<u8>,
    pub day: Option<u8>,
    pub year: Option<i32>,
}

impl DateParts {
    #[must_use]
    pub fn new(month: Option<u8>, day: Option<u8>, year: Option<i32>) -> Self {
        Self { month, day, year }
    }

    #[must_use]
    pub fn from_date(date: Date) -> Self {
        Self {
            month: Some(u8::from(date.month())),
            day: Some(date.day()),
            year: Some(date.year()),
        }
    }

    /// Returns `true` if nothing has been entered.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.month.is_none() && self.day.is_none() && self.year.is_none()
    }

    #[must_use]
    pub fn is_month_valid(&self) -> bool {
        self.month.is_some_and(|m| (1..=12).contains(&m))
    }

    #[must_use]
    pub fn is_day_valid(&self) -> bool {
        let max = days_in_month(self.month.unwrap_or(0), self.year);
        self.day.is_some_and(|d| (1..=max).contains(&d))
    }

    #[must_use]
    pub fn is_year_valid(&self) -> bool {
        self.year.is_some_and(|y| y >= 1)
    }

    /// The calendar date, if all three parts are present and consistent.
    #[must_use]
    pub fn to_date(&self) -> Option<Date> {
        if !(self.is_month_valid() && self.is_day_valid() && self.is_year_valid()) {
            return None;
        }
        let month = Month::try_from(self.month?).ok()?;
        Date::from_calendar_date(self.year?, month, self.day?).ok()
    }
}

impl fmt::Display for DateParts {
    /// `MM/DD/YYYY`, with missing parts left blank.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(month) => write!(f, "{month:02}/")?,
            None => f.write_str("/")?,
        }
        match self.day {
            Some(day) => write!(f, "{day:02}/")?,
            None => f.write_str("/")?,
        }
        if let Some(year) = self.year {
            write!(f, "{year}")?;
        }
        Ok(())
    }
}

impl From<Date> for DateParts {
    fn from(date: Date) -> Self {
        Self::from_date(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn february_depends_on_year() {
        assert_eq!(days_in_month(2, None), 29);
        assert_eq!(days_in_month(2, Some(2020)), 29);
        assert_eq!(days_in_month(2, Some(2019)), 28);
        assert_eq!(days_in_month(2, Some(1900)), 28);
        assert_eq!(days_in_month(9, Some(2019)), 30);
        assert_eq!(days_in_month(12, None), 31);
    }

    #[test]
    fn leap_day_without_year_is_plausible() {
        let parts = DateParts::new(Some(2), Some(29), None);
        assert!(parts.is_day_valid());
        assert_eq!(parts.to_date(), None);
    }

    #[test]
    fn leap_day_in_common_year_is_rejected() {
        let parts = DateParts::new(Some(2), Some(29), Some(2019));
        assert!(!parts.is_day_valid());
        assert_eq!(parts.to_date(), None);
    }

    #[test]
    fn complete_parts_form_a_date() {
        let parts = DateParts::new(Some(1), Some(31), Some(2020));
        assert_eq!(parts.to_date(), Some(date!(2020 - 01 - 31)));
        assert_eq!(parts.to_string(), "01/31/2020");
        assert_eq!(DateParts::from(date!(2020 - 01 - 31)), parts);
    }

    #[test]
    fn bad_parts() {
        assert!(!DateParts::new(Some(13), Some(1), Some(2020)).is_month_valid());
        assert!(!DateParts::new(Some(0), Some(1), Some(2020)).is_month_valid());
        assert!(!DateParts::new(Some(4), Some(31), Some(2020)).is_day_valid());
        assert!(!DateParts::new(Some(4), Some(1), Some(0)).is_year_valid());
        assert!(DateParts::default().is_blank());
    }

    #[test]
    fn bounds_are_exclusive() {
        let min = Some(date!(2019 - 01 - 01));
        let max = Some(date!(2022 - 01 - 01));
        assert!(within_exclusive(date!(2020 - 06 - 01), min, max));
        assert!(!within_exclusive(date!(2019 - 01 - 01), min, max));
        assert!(!within_exclusive(date!(2022 - 01 - 01), min, max));
        assert!(within_exclusive(date!(1900 - 01 - 01), None, max));
    }
}
