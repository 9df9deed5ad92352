//! Business-hours calendar.
//!
//! All arithmetic is done in UTC wall-clock time: "advance one day" moves to
//! the next calendar date at the configured start hour, regardless of how many
//! elapsed hours that is.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use crate::error::CalendarError;
use crate::settings::EscalationSettings;

/// Days examined after the starting date before giving up.
const MAX_DAY_STEPS: usize = 7;

/// A validated business-hours window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessCalendar {
    window: Option<BusinessWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BusinessWindow {
    start_hour: u32,
    end_hour: u32,
    /// Indexed by ISO weekday number; slot 0 is unused.
    days: [bool; 8],
}

impl BusinessCalendar {
    /// Calendar that treats every instant as business time.
    #[must_use]
    pub const fn always_open() -> Self {
        Self { window: None }
    }

    /// Build a calendar from settings, validating the window when
    /// `business_hours_only` is set.
    pub fn from_settings(settings: &EscalationSettings) -> Result<Self, CalendarError> {
        if !settings.business_hours_only {
            return Ok(Self::always_open());
        }

        let start = settings.business_start_hour;
        let end = settings.business_end_hour;
        if !(0..=23).contains(&start) || !(0..=23).contains(&end) || start >= end {
            return Err(CalendarError::InvalidHours { start, end });
        }

        if settings.business_days.is_empty() {
            return Err(CalendarError::NoBusinessDays);
        }
        let mut days = [false; 8];
        for &day in &settings.business_days {
            let slot = usize::try_from(day)
                .ok()
                .filter(|d| (1..=7).contains(d))
                .ok_or(CalendarError::InvalidWeekday(day))?;
            days[slot] = true;
        }

        Ok(Self {
            window: Some(BusinessWindow {
                start_hour: start.unsigned_abs(),
                end_hour: end.unsigned_abs(),
                days,
            }),
        })
    }

    /// Whether `instant` falls inside business hours.
    #[must_use]
    pub fn is_business_time(&self, instant: DateTime<Utc>) -> bool {
        match &self.window {
            None => true,
            Some(window) => {
                window.is_business_day(instant.date_naive())
                    && (window.start_hour..window.end_hour).contains(&instant.hour())
            }
        }
    }

    /// The first business instant at or after `instant`.
    ///
    /// Returns `instant` unchanged when it already is business time.
    pub fn next_business_instant(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CalendarError> {
        let Some(window) = &self.window else {
            return Ok(instant);
        };
        if self.is_business_time(instant) {
            return Ok(instant);
        }

        let mut date = instant.date_naive();
        if window.is_business_day(date) && instant.hour() < window.start_hour {
            return window.opening(date, instant);
        }

        for _ in 0..MAX_DAY_STEPS {
            date = date.succ_opt().ok_or(CalendarError::Unreachable(instant))?;
            if window.is_business_day(date) {
                return window.opening(date, instant);
            }
        }

        Err(CalendarError::Unreachable(instant))
    }
}

impl BusinessWindow {
    fn is_business_day(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().number_from_monday() as usize;
        self.days[weekday]
    }

    fn opening(
        &self,
        date: NaiveDate,
        from: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CalendarError> {
        date.and_hms_opt(self.start_hour, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or(CalendarError::Unreachable(from))
    }
}
