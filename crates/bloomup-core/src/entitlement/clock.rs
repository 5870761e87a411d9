//! Calendar source for day-rollover decisions.

use std::sync::Mutex;

use chrono::{Local, NaiveDate};

/// Date format used when persisting and comparing reset dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Supplies the current calendar date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;

    /// Today's date in the persisted `YYYY-MM-DD` form.
    fn today_string(&self) -> String {
        self.today().format(DATE_FORMAT).to_string()
    }
}

/// The local wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock whose date only changes when told to.
#[derive(Debug)]
pub struct ManualClock {
    date: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Mutex::new(date),
        }
    }

    pub fn set(&self, date: NaiveDate) {
        *self.date.lock().unwrap_or_else(|e| e.into_inner()) = date;
    }

    /// Move the clock forward by `days` calendar days.
    pub fn advance_days(&self, days: u64) {
        let mut date = self.date.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = date.checked_add_days(chrono::Days::new(days)) {
            *date = next;
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.date.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn today_string_is_iso_date() {
        let clock = ManualClock::new(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert_eq!(clock.today_string(), "2026-03-09");
    }

    #[test]
    fn manual_clock_advances_across_month_end() {
        let clock = ManualClock::new(NaiveDate::from_ymd_opt(2026, 1, 31).unwrap());
        clock.advance_days(1);
        assert_eq!(clock.today_string(), "2026-02-01");
    }

    #[test]
    fn manual_clock_set_overrides_date() {
        let clock = ManualClock::new(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        clock.set(NaiveDate::from_ymd_opt(2027, 6, 15).unwrap());
        assert_eq!(clock.today_string(), "2027-06-15");
    }
}
