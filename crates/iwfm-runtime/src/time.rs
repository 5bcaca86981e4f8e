//! Engine timestamps
//!
//! The engine writes dates as `MM/DD/YYYY_HH:MM`. Midnight is written as
//! `24:00` of the previous day, which marks the end of that day's step.

use crate::error::{IwfmError, IwfmResult};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

const DATE_FORMAT: &str = "%m/%d/%Y";

/// Parse one engine timestamp
pub fn parse_timestamp(value: &str) -> IwfmResult<NaiveDateTime> {
    let trimmed = value.trim_end_matches([' ', '\0']).trim_start();
    let invalid = |reason: &str| IwfmError::Timestamp {
        value: trimmed.to_string(),
        reason: reason.to_string(),
    };

    let (date, time) = trimmed
        .split_once('_')
        .ok_or_else(|| invalid("expected MM/DD/YYYY_HH:MM"))?;
    let date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|e| invalid(&e.to_string()))?;

    let (hour, minute) = time
        .split_once(':')
        .ok_or_else(|| invalid("expected HH:MM after the date"))?;
    let hour: u32 = hour.parse().map_err(|_| invalid("hour is not a number"))?;
    let minute: u32 = minute.parse().map_err(|_| invalid("minute is not a number"))?;

    if hour == 24 && minute == 0 {
        return Ok(date.and_time(NaiveTime::MIN) + Duration::days(1));
    }
    let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| invalid("time out of range"))?;
    Ok(date.and_time(time))
}

/// Format a timestamp the way the engine expects it
///
/// Midnight is written as `24:00` of the previous day.
pub fn format_timestamp(value: NaiveDateTime) -> String {
    if value.hour() == 0 && value.minute() == 0 {
        let previous = value.date() - Duration::days(1);
        return format!("{}_24:00", previous.format(DATE_FORMAT));
    }
    format!("{}_{:02}:{:02}", value.date().format(DATE_FORMAT), value.hour(), value.minute())
}

/// Parse every timestamp of a packed list
pub fn parse_all<S: AsRef<str>>(values: &[S]) -> IwfmResult<Vec<NaiveDateTime>> {
    values.iter().map(|v| parse_timestamp(v.as_ref())).collect()
}
