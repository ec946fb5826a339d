//! Business-day reconciliation window.
//!
//! For date D with `work_start_hour = S` and `work_end_hour = E` the window
//! is `[D S:00, D+1 E:00)` in terminal-local time when `E <= S`, otherwise
//! `[D S:00, D E:00)`. A cutoff narrows the end to the first occurrence of
//! the cutoff time at or after the day start.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use kassa_config::WorkDay;

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessWindow {
    pub tz: Tz,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusinessWindow {
    pub fn for_day(
        workday: &WorkDay,
        tz_override: Option<&str>,
        date: NaiveDate,
        cutoff: Option<NaiveTime>,
    ) -> Result<Self, SourceError> {
        let tz_name = tz_override.unwrap_or(&workday.timezone);
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| SourceError::Config(format!("unknown timezone '{tz_name}'")))?;

        let start_time = hour(workday.work_start_hour)?;
        let end_time = hour(workday.work_end_hour)?;
        let next_day = date + Duration::days(1);

        let start_naive = date.and_time(start_time);
        let mut end_naive = if workday.work_end_hour <= workday.work_start_hour {
            next_day.and_time(end_time)
        } else {
            date.and_time(end_time)
        };
        if let Some(cut) = cutoff {
            let cut_naive = if cut < start_time {
                next_day.and_time(cut)
            } else {
                date.and_time(cut)
            };
            end_naive = end_naive.min(cut_naive);
        }

        Ok(Self {
            tz,
            start: to_utc(tz, start_naive)?,
            end: to_utc(tz, end_naive)?,
        })
    }

    pub fn start_local(&self) -> NaiveDateTime {
        self.start.with_timezone(&self.tz).naive_local()
    }

    pub fn end_local(&self) -> NaiveDateTime {
        self.end.with_timezone(&self.tz).naive_local()
    }

    /// Local `YYYY-MM-DDTHH:MM:SS` bounds, the shape upstream report APIs take.
    pub fn local_bounds(&self) -> (String, String) {
        let f = "%Y-%m-%dT%H:%M:%S";
        (
            self.start_local().format(f).to_string(),
            self.end_local().format(f).to_string(),
        )
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

fn hour(h: u32) -> Result<NaiveTime, SourceError> {
    NaiveTime::from_hms_opt(h, 0, 0)
        .ok_or_else(|| SourceError::Config(format!("work-day hour {h} out of range")))
}

fn to_utc(tz: Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>, SourceError> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| SourceError::Config(format!("local time {naive} does not exist in {tz}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn default_day_spans_into_next_calendar_day() {
        let w = BusinessWindow::for_day(&WorkDay::default(), None, d(2026, 4, 2), None).unwrap();
        let (from, to) = w.local_bounds();
        assert_eq!(from, "2026-04-02T06:00:00");
        assert_eq!(to, "2026-04-03T04:00:00");
        // Asia/Tashkent is UTC+5.
        assert_eq!(w.start.to_rfc3339(), "2026-04-02T01:00:00+00:00");
    }

    #[test]
    fn same_day_window_when_end_after_start() {
        let workday = WorkDay {
            timezone: "UTC".to_string(),
            work_start_hour: 8,
            work_end_hour: 22,
        };
        let w = BusinessWindow::for_day(&workday, None, d(2026, 4, 2), None).unwrap();
        assert_eq!(w.local_bounds().1, "2026-04-02T22:00:00");
    }

    #[test]
    fn cutoff_narrows_the_end() {
        let wd = WorkDay::default();
        let noon = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
        let w = BusinessWindow::for_day(&wd, None, d(2026, 4, 2), Some(noon)).unwrap();
        assert_eq!(w.local_bounds().1, "2026-04-02T12:30:00");

        // After midnight, before the day start: belongs to the next calendar day.
        let late = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        let w = BusinessWindow::for_day(&wd, None, d(2026, 4, 2), Some(late)).unwrap();
        assert_eq!(w.local_bounds().1, "2026-04-03T02:00:00");

        // Never extends past the business-day end.
        let after_end = NaiveTime::from_hms_opt(5, 0, 0).unwrap();
        let w = BusinessWindow::for_day(&wd, None, d(2026, 4, 2), Some(after_end)).unwrap();
        assert_eq!(w.local_bounds().1, "2026-04-03T04:00:00");
    }

    #[test]
    fn terminal_timezone_override_and_unknown_zone() {
        let wd = WorkDay::default();
        let w = BusinessWindow::for_day(&wd, Some("UTC"), d(2026, 4, 2), None).unwrap();
        assert_eq!(w.start.to_rfc3339(), "2026-04-02T06:00:00+00:00");
        assert!(w.contains(w.start));
        assert!(!w.contains(w.end));

        let err = BusinessWindow::for_day(&wd, Some("Mars/Olympus"), d(2026, 4, 2), None).unwrap_err();
        assert!(matches!(err, SourceError::Config(_)));
    }
}
