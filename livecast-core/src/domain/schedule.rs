//! Scheduled start of a job
//!
//! A schedule is either `NOW` or a time of day. No date is stored: the
//! scheduler compares clock times only, and the broadcast start sent to the
//! platform rolls over to the next day when the time has already passed.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const IMMEDIATE: &str = "NOW";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid scheduled start '{0}', expected NOW or HH:MM")]
pub struct ScheduleParseError(pub String);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScheduledStart {
    #[default]
    Immediate,
    At(NaiveTime),
}

impl ScheduledStart {
    /// Parses `NOW`, `HH:MM` or `HH:MM:SS`
    ///
    /// A trailing zone label such as `21:30 WIB` is ignored, the time is
    /// always interpreted in the controller's schedule timezone.
    pub fn parse(input: &str) -> Result<Self, ScheduleParseError> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case(IMMEDIATE) {
            return Ok(ScheduledStart::Immediate);
        }

        let clock = trimmed
            .split_whitespace()
            .next()
            .ok_or_else(|| ScheduleParseError(input.to_string()))?;

        NaiveTime::parse_from_str(clock, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(clock, "%H:%M:%S"))
            .map(|t| ScheduledStart::At(truncate_to_minute(t)))
            .map_err(|_| ScheduleParseError(input.to_string()))
    }

    /// Whether a waiting job with this schedule should fire at `now`
    ///
    /// Minute precision: a job scheduled for 14:05 is due from 14:05:00
    /// until midnight.
    pub fn is_due(&self, now: NaiveTime) -> bool {
        match self {
            ScheduledStart::Immediate => true,
            ScheduledStart::At(at) => truncate_to_minute(now) >= *at,
        }
    }

    /// Next wall-clock instant matching this schedule
    ///
    /// Used when provisioning a remote broadcast. A time that is not strictly
    /// in the future means tomorrow.
    pub fn next_occurrence(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match self {
            ScheduledStart::Immediate => now,
            ScheduledStart::At(at) => {
                let naive = now.date_naive().and_time(*at);
                let candidate = now
                    .timezone()
                    .from_local_datetime(&naive)
                    .single()
                    .unwrap_or(now);
                if candidate <= now {
                    candidate + Duration::days(1)
                } else {
                    candidate
                }
            }
        }
    }
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

impl TryFrom<String> for ScheduledStart {
    type Error = ScheduleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ScheduledStart::parse(&value)
    }
}

impl From<ScheduledStart> for String {
    fn from(start: ScheduledStart) -> Self {
        start.to_string()
    }
}

impl std::str::FromStr for ScheduledStart {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScheduledStart::parse(s)
    }
}

impl std::fmt::Display for ScheduledStart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduledStart::Immediate => f.write_str(IMMEDIATE),
            ScheduledStart::At(at) => write!(f, "{}", at.format("%H:%M")),
        }
    }
}
