//! Clock abstraction and site time-zone conversion.
//!
//! Schedules arrive as a local wall-clock string plus an IANA zone. They are
//! stored and compared as UTC instants and converted back for display.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Accepted local-time input formats, most specific first.
const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Display format for local wall-clock times (minute precision).
pub const LOCAL_DISPLAY_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("unknown time zone '{0}'")]
    UnknownZone(String),

    #[error("cannot parse local time '{0}'")]
    Unparseable(String),

    #[error("local time '{local}' does not exist in {zone}")]
    Nonexistent { local: String, zone: String },
}

/// Source of the current instant. Injected so tests can pin time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn parse_zone(zone: &str) -> Result<Tz, TimeError> {
    zone.parse::<Tz>()
        .map_err(|_| TimeError::UnknownZone(zone.to_string()))
}

fn parse_local(local: &str) -> Result<NaiveDateTime, TimeError> {
    let trimmed = local.trim();
    LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| TimeError::Unparseable(local.to_string()))
}

/// Convert a local wall-clock string in `zone` to a UTC instant.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant. Times
/// skipped by a DST spring-forward are rejected.
pub fn local_to_utc(local: &str, zone: &str) -> Result<DateTime<Utc>, TimeError> {
    let tz = parse_zone(zone)?;
    let naive = parse_local(local)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TimeError::Nonexistent {
            local: local.to_string(),
            zone: zone.to_string(),
        })
}

/// Convert a UTC instant to wall-clock time in `zone`.
pub fn utc_to_local(instant: DateTime<Utc>, zone: &str) -> Result<NaiveDateTime, TimeError> {
    let tz = parse_zone(zone)?;
    Ok(instant.with_timezone(&tz).naive_local())
}

/// Format a UTC instant as `YYYY-MM-DDTHH:MM` in `zone`.
pub fn format_local(instant: DateTime<Utc>, zone: &str) -> Result<String, TimeError> {
    Ok(utc_to_local(instant, zone)?
        .format(LOCAL_DISPLAY_FORMAT)
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_zone_is_identity() {
        let at = local_to_utc("2099-01-01T00:00", "UTC").unwrap();
        assert_eq!(at.to_rfc3339(), "2099-01-01T00:00:00+00:00");
    }

    #[test]
    fn converts_named_zone() {
        // New York is UTC-5 in January.
        let at = local_to_utc("2030-01-15T09:30", "America/New_York").unwrap();
        assert_eq!(at.to_rfc3339(), "2030-01-15T14:30:00+00:00");
    }

    #[test]
    fn round_trips_to_the_minute() {
        for zone in ["UTC", "Europe/Berlin", "Asia/Kolkata", "America/Los_Angeles"] {
            let at = local_to_utc("2031-07-04 18:45", zone).unwrap();
            assert_eq!(format_local(at, zone).unwrap(), "2031-07-04T18:45", "{zone}");
        }
    }

    #[test]
    fn accepts_seconds() {
        let at = local_to_utc("2030-03-01T10:00:30", "UTC").unwrap();
        assert_eq!(at.to_rfc3339(), "2030-03-01T10:00:30+00:00");
    }

    #[test]
    fn rejects_unknown_zone() {
        assert_eq!(
            local_to_utc("2030-01-01T00:00", "Mars/Olympus"),
            Err(TimeError::UnknownZone("Mars/Olympus".to_string()))
        );
    }

    #[test]
    fn rejects_garbage_input() {
        assert!(matches!(
            local_to_utc("tomorrow at noon", "UTC"),
            Err(TimeError::Unparseable(_))
        ));
    }

    #[test]
    fn rejects_spring_forward_gap() {
        // 02:30 does not exist on 2030-03-10 in New York.
        assert!(matches!(
            local_to_utc("2030-03-10T02:30", "America/New_York"),
            Err(TimeError::Nonexistent { .. })
        ));
    }

    #[test]
    fn fall_back_picks_earlier_instant() {
        // 01:30 happens twice on 2030-11-03 in New York; the first is EDT (UTC-4).
        let at = local_to_utc("2030-11-03T01:30", "America/New_York").unwrap();
        assert_eq!(at.to_rfc3339(), "2030-11-03T05:30:00+00:00");
    }

    #[test]
    fn fixed_clock_advances() {
        let start = local_to_utc("2030-01-01T00:00", "UTC").unwrap();
        let clock = FixedClock::new(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }
}
