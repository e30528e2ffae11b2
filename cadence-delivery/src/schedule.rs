//! Send-time resolution for sequence steps
//!
//! Every step carries either an explicit calendar date or a day offset from a
//! reference date, plus a time of day. Resolution produces a naive local
//! timestamp, or `None` meaning "send immediately". Malformed input also
//! resolves to `None`: callers must treat it as "send now", never as an error.
//!
//! Timestamps are always naive local time. The transport interprets them in
//! the machine's own zone, so zone information is stripped before any value
//! leaves this module.

use std::{path::PathBuf, sync::Arc};

use chrono::{
    DateTime, Datelike, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Weekday,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Accepted time-of-day formats, tried in order
const TIME_FORMATS: [&str; 2] = ["%I:%M %p", "%H:%M"];

/// How a step's send time is expressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timing {
    /// Explicit `YYYY-MM-DD` date and time of day
    At { date: String, time: String },

    /// Calendar days after the reference date
    Offset { days: i64, time: String },

    /// Weekdays after the reference date, Saturdays and Sundays skipped
    BusinessDays { days: u32, time: String },
}

impl Timing {
    /// Resolve against `reference`, returning `None` for "send immediately"
    #[must_use]
    pub fn resolve(&self, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Self::At { date, time } => resolve_at(date, time),
            Self::Offset { days, time } => resolve_offset(*days, time, reference),
            Self::BusinessDays { days, time } => {
                let target = add_business_days(reference.date(), *days);
                let calendar_days = (target - reference.date()).num_days();
                resolve_offset(calendar_days, time, reference)
            }
        }
    }

    /// The date as entered, empty for offset timings
    #[must_use]
    pub fn raw_date(&self) -> &str {
        match self {
            Self::At { date, .. } => date,
            Self::Offset { .. } | Self::BusinessDays { .. } => "",
        }
    }

    /// The time of day as entered
    #[must_use]
    pub fn raw_time(&self) -> &str {
        match self {
            Self::At { time, .. } | Self::Offset { time, .. } | Self::BusinessDays { time, .. } => {
                time
            }
        }
    }
}

/// One email in a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    #[serde(default)]
    pub subject: String,

    /// Plain text or markup; see [`crate::template::is_rich`]
    #[serde(default)]
    pub body: String,

    pub timing: Timing,

    /// Files to attach; paths that do not exist at send time are skipped
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
}

impl SequenceStep {
    #[must_use]
    pub fn new(subject: impl Into<String>, body: impl Into<String>, timing: Timing) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            timing,
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// A step with neither subject nor body produces no message
    #[must_use]
    pub fn is_inert(&self) -> bool {
        self.subject.trim().is_empty() && self.body.trim().is_empty()
    }
}

/// Ordered steps of one campaign
pub type Schedule = Vec<SequenceStep>;

/// Source of the reference "now" used for offsets and future checks
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> NaiveDateTime;
}

/// The machine's local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        strip_zone(&Local::now())
    }
}

/// A clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> NaiveDateTime {
        (**self).now()
    }
}

/// Returns `true` for a blank time or any text starting with "immed"
#[must_use]
pub fn is_immediate(time: &str) -> bool {
    let time = time.trim();
    time.is_empty()
        || time
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("immed"))
}

/// Parse a 12-hour (`9:00 AM`) or 24-hour (`17:30`) time of day
#[must_use]
pub fn parse_time(time: &str) -> Option<NaiveTime> {
    let time = time.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(time, format).ok())
}

/// Resolve an explicit date and time of day
#[must_use]
pub fn resolve_at(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = date.trim();
    if date.is_empty() || is_immediate(time) {
        return None;
    }

    let date = NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
    parse_time(time).map(|time| date.and_time(time))
}

/// Resolve a calendar-day offset from `reference` and a time of day
#[must_use]
pub fn resolve_offset(days: i64, time: &str, reference: NaiveDateTime) -> Option<NaiveDateTime> {
    if is_immediate(time) {
        return None;
    }

    let time = parse_time(time)?;
    let date = reference
        .date()
        .checked_add_signed(TimeDelta::try_days(days)?)?;
    Some(date.and_time(time))
}

/// Advance `date` by `days` weekdays
#[must_use]
pub fn add_business_days(date: NaiveDate, days: u32) -> NaiveDate {
    let mut current = date;
    let mut remaining = days;

    while remaining > 0 {
        let Some(next) = current.checked_add_days(Days::new(1)) else {
            break;
        };
        current = next;
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }

    current
}

/// Push `base` later by a uniformly random whole number of minutes in
/// `[0, window_minutes]`
pub fn apply_send_window<R: Rng>(
    base: NaiveDateTime,
    window_minutes: u32,
    rng: &mut R,
) -> NaiveDateTime {
    if window_minutes == 0 {
        return base;
    }

    let offset = rng.random_range(0..=window_minutes);
    base + TimeDelta::minutes(i64::from(offset))
}

/// Drop zone information, keeping the wall-clock reading in that zone
#[must_use]
pub fn strip_zone<Tz: TimeZone>(at: &DateTime<Tz>) -> NaiveDateTime {
    at.naive_local()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{FixedOffset, Timelike};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_resolve_at_twelve_hour() {
        let resolved = resolve_at("2026-03-02", "9:05 AM").unwrap();
        assert_eq!(resolved, at("2026-03-02", "09:05"));

        let resolved = resolve_at("2026-03-02", "12:30 pm").unwrap();
        assert_eq!(resolved, at("2026-03-02", "12:30"));

        let resolved = resolve_at("2026-12-31", "11:59 PM").unwrap();
        assert_eq!(resolved, at("2026-12-31", "23:59"));
    }

    #[test]
    fn test_resolve_at_twenty_four_hour() {
        let resolved = resolve_at(" 2026-03-02 ", " 17:45 ").unwrap();
        assert_eq!(resolved.year(), 2026);
        assert_eq!(resolved.month(), 3);
        assert_eq!(resolved.day(), 2);
        assert_eq!(resolved.hour(), 17);
        assert_eq!(resolved.minute(), 45);
    }

    #[test]
    fn test_resolve_at_components_match_for_every_slot() {
        for hour in 0..24 {
            for minute in [0, 15, 30, 45] {
                let time = format!("{hour:02}:{minute:02}");
                let resolved = resolve_at("2027-01-15", &time).unwrap();
                assert_eq!((resolved.hour(), resolved.minute()), (hour, minute));
                assert_eq!(resolved.date(), NaiveDate::from_ymd_opt(2027, 1, 15).unwrap());
            }
        }
    }

    #[test]
    fn test_blank_date_is_immediate() {
        assert_eq!(resolve_at("", "9:00 AM"), None);
        assert_eq!(resolve_at("   ", "09:00"), None);
    }

    #[test]
    fn test_immediate_time_ignores_date() {
        for time in ["Immediately", "immed", "IMMEDIATE", "immediately please", ""] {
            assert_eq!(resolve_at("2026-03-02", time), None, "{time:?}");
            assert_eq!(
                resolve_offset(3, time, at("2026-03-02", "08:00")),
                None,
                "{time:?}"
            );
        }
    }

    #[test]
    fn test_malformed_input_is_none() {
        assert_eq!(resolve_at("03/02/2026", "9:00 AM"), None);
        assert_eq!(resolve_at("2026-02-30", "9:00 AM"), None);
        assert_eq!(resolve_at("2026-03-02", "nine o'clock"), None);
        assert_eq!(resolve_at("2026-03-02", "25:00"), None);
        assert_eq!(resolve_offset(1, "soon", at("2026-03-02", "08:00")), None);
    }

    #[test]
    fn test_resolve_offset_adds_calendar_days() {
        let reference = at("2026-02-27", "16:20");

        assert_eq!(
            resolve_offset(0, "9:00 AM", reference),
            Some(at("2026-02-27", "09:00"))
        );
        assert_eq!(
            resolve_offset(2, "9:00 AM", reference),
            Some(at("2026-03-01", "09:00"))
        );
        assert_eq!(
            resolve_offset(-1, "13:00", reference),
            Some(at("2026-02-26", "13:00"))
        );
    }

    #[test]
    fn test_add_business_days_skips_weekends() {
        // 2026-03-06 is a Friday
        let friday = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();

        assert_eq!(add_business_days(friday, 0), friday);
        assert_eq!(
            add_business_days(friday, 1),
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
        );
        assert_eq!(
            add_business_days(friday, 5),
            NaiveDate::from_ymd_opt(2026, 3, 13).unwrap()
        );
    }

    #[test]
    fn test_business_days_timing() {
        let timing = Timing::BusinessDays {
            days: 2,
            time: "10:00".to_string(),
        };

        // Thursday + 2 business days = Monday
        let reference = at("2026-03-05", "15:00");
        assert_eq!(timing.resolve(reference), Some(at("2026-03-09", "10:00")));
        assert_eq!(timing.raw_date(), "");
        assert_eq!(timing.raw_time(), "10:00");
    }

    #[test]
    fn test_send_window_bounds() {
        let base = at("2026-03-02", "09:00");
        let upper = base + TimeDelta::minutes(30);
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..1000 {
            let windowed = apply_send_window(base, 30, &mut rng);
            assert!(windowed >= base && windowed <= upper, "{windowed}");
            assert_eq!(windowed.second(), 0);
        }
    }

    #[test]
    fn test_zero_window_is_identity() {
        let base = at("2026-03-02", "09:00");
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(apply_send_window(base, 0, &mut rng), base);
    }

    #[test]
    fn test_strip_zone_keeps_wall_clock() {
        let zone = FixedOffset::west_opt(7 * 3600).unwrap();
        let zoned = zone.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        assert_eq!(strip_zone(&zoned), at("2026-03-02", "09:00"));
    }

    #[test]
    fn test_inert_step() {
        let timing = Timing::Offset {
            days: 0,
            time: String::new(),
        };
        assert!(SequenceStep::new("  ", "\n", timing.clone()).is_inert());
        assert!(!SequenceStep::new("Hello", "", timing.clone()).is_inert());
        assert!(!SequenceStep::new("", "Body", timing).is_inert());
    }

    #[test]
    fn test_fixed_clock() {
        let clock = Arc::new(FixedClock(at("2026-03-02", "07:00")));
        assert_eq!(clock.now(), at("2026-03-02", "07:00"));
    }
}
