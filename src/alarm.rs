use std::fmt;

use chrono::{
    DateTime, Days, Local, LocalResult, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AlarmError, station::CLASSIC_STATION_ID};

pub const DEFAULT_SNOOZE_MINUTES: u32 = 5;
pub const MAX_SNOOZE_MINUTES: u32 = 60;

/// Stable identity of the alarm, kept across edits and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(Uuid);

impl AlarmId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where the currently armed `next_trigger_at` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    /// the daily hour:minute
    #[default]
    Scheduled,
    Snooze,
}

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

#[must_use]
pub const fn default_snooze_minutes() -> u32 {
    DEFAULT_SNOOZE_MINUTES
}

#[must_use]
pub fn default_station() -> String {
    CLASSIC_STATION_ID.to_string()
}

/// The single alarm of an installation.
///
/// Only [`crate::scheduler::AlarmService`] mutates it; everything else gets a
/// shared reference or a snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Alarm {
    #[serde(default)]
    pub id: AlarmId,
    #[serde(with = "toml_datetime_compat")]
    pub time: NaiveTime,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: u32,
    #[serde(default)]
    pub snooze_count: u32,
    #[serde(default = "always_true")]
    pub volume_fade_in: bool,
    #[serde(default = "default_station")]
    pub station: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_trigger_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub origin: TriggerOrigin,
    /// between firing and stop/snooze, never written to disk
    #[serde(skip)]
    pub triggered: bool,
}

impl Default for Alarm {
    fn default() -> Self {
        Self {
            id: AlarmId::new(),
            time: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            enabled: false,
            snooze_minutes: DEFAULT_SNOOZE_MINUTES,
            snooze_count: 0,
            volume_fade_in: true,
            station: default_station(),
            next_trigger_at: None,
            origin: TriggerOrigin::Scheduled,
            triggered: false,
        }
    }
}

impl Alarm {
    #[must_use]
    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    #[must_use]
    pub fn minute(&self) -> u32 {
        self.time.minute()
    }

    #[must_use]
    pub fn time_string(&self, time_format: &str) -> String {
        self.time.format(time_format).to_string()
    }

    /// "7h 5m" or "5m" until the next firing, empty when the alarm is off
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Local>) -> String {
        if !self.enabled {
            return String::new();
        }
        let next = self
            .next_trigger_at
            .unwrap_or_else(|| next_trigger(self.time, &now));
        let seconds = (next - now).num_seconds();
        if seconds < 0 {
            return String::new();
        }
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        if hours > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{minutes}m")
        }
    }
}

/// Builds a time of day from user supplied parts, rejecting out of range values.
pub fn time_of_day(hour: u32, minute: u32) -> Result<NaiveTime, AlarmError> {
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or(AlarmError::InvalidTime { hour, minute })
}

/// Parses `HH:MM` (24 hour clock).
pub fn parse_time(input: &str) -> Result<NaiveTime, AlarmError> {
    let malformed = || AlarmError::MalformedTime(input.to_string());
    let (hour, minute) = input.trim().split_once(':').ok_or_else(malformed)?;
    let hour = hour.parse().map_err(|_| malformed())?;
    let minute = minute.parse().map_err(|_| malformed())?;
    time_of_day(hour, minute)
}

/// The next firing of `time` strictly after `now`: today if that is still
/// ahead, otherwise tomorrow.
///
/// Wall-clock times are resolved against `now`'s time zone. When a DST shift
/// makes the target ambiguous the earlier instant wins, and when the target
/// falls into a skipped hour it is pushed forward by that hour (02:30 becomes
/// 03:30), the same as a lenient calendar would construct it.
pub fn next_trigger<Tz: TimeZone>(time: NaiveTime, now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let candidate = resolve_wall_clock(&tz, today.and_time(time));
    if candidate > *now {
        return candidate;
    }
    match today.checked_add_days(Days::new(1)) {
        Some(tomorrow) => resolve_wall_clock(&tz, tomorrow.and_time(time)),
        None => candidate,
    }
}

fn resolve_wall_clock<Tz: TimeZone>(tz: &Tz, at: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&at) {
        LocalResult::Single(resolved) | LocalResult::Ambiguous(resolved, _) => resolved,
        LocalResult::None => {
            let shifted = at + TimeDelta::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(resolved) | LocalResult::Ambiguous(resolved, _) => resolved,
                LocalResult::None => tz.from_utc_datetime(&at),
            }
        }
    }
}
