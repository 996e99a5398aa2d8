//! Wall-clock conversion and bucketing of zones by local time.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::{SchedulerError, TimezoneCatalog, TimezoneId};

/// A wall-clock time of day at minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTime {
    hour: u32,
    minute: u32,
}

impl LocalTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        if hour > 23 || minute > 59 {
            return Err(SchedulerError::InvalidLocalTime(format!(
                "{:02}:{:02}",
                hour, minute
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Caller guarantees `hour < 24` and `minute < 60`.
    pub(crate) const fn from_parts(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Whether `at` shows this hour and minute.
    pub fn matches<T: Timelike>(&self, at: &T) -> bool {
        at.hour() == self.hour && at.minute() == self.minute
    }
}

impl FromStr for LocalTime {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchedulerError::InvalidLocalTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if h.is_empty() || h.len() > 2 || m.len() != 2 || !digits(h) || !digits(m) {
            return Err(invalid());
        }
        let hour = h.parse().map_err(|_| invalid())?;
        let minute = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Render `now` in `zone`.
pub fn local_time_in(zone: &str, now: DateTime<Utc>) -> Result<DateTime<Tz>, SchedulerError> {
    let tz: Tz = zone
        .parse()
        .map_err(|_| SchedulerError::UnknownTimezone(zone.to_string()))?;
    Ok(now.with_timezone(&tz))
}

/// Every catalog zone whose local wall clock reads `target` at `now`.
///
/// Zones the tz database does not know are skipped.
pub fn zones_at_local_time(
    catalog: &TimezoneCatalog,
    now: DateTime<Utc>,
    target: LocalTime,
) -> BTreeSet<TimezoneId> {
    let mut due = BTreeSet::new();
    for zone in catalog.list_all() {
        match local_time_in(zone, now) {
            Ok(local) if target.matches(&local) => {
                due.insert(zone.clone());
            }
            Ok(_) => {}
            Err(e) => debug!(zone = %zone, error = %e, "skipping zone"),
        }
    }
    due
}
