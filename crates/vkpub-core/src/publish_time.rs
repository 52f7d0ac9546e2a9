//! Parsing and validation of the operator's publish-time reply.
//!
//! Accepted forms are `"DD HH:MM"` and `"HH:MM"`; year and month always come from
//! "now" in the configured zone, and a bare time means today.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PublishTimeError {
    #[error("expected 'DD HH:MM' or 'HH:MM'")]
    Format,
    #[error("publish time is not in the future")]
    NotInFuture,
}

/// Build the candidate timestamp without judging whether it is in the future.
pub fn parse_publish_time(
    input: &str,
    now: DateTime<Tz>,
) -> std::result::Result<DateTime<Tz>, PublishTimeError> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let (day, time) = match parts.as_slice() {
        [time] => (now.day(), *time),
        [day, time] => (
            day.parse::<u32>().map_err(|_| PublishTimeError::Format)?,
            *time,
        ),
        _ => return Err(PublishTimeError::Format),
    };

    let time = NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| PublishTimeError::Format)?;
    let date =
        NaiveDate::from_ymd_opt(now.year(), now.month(), day).ok_or(PublishTimeError::Format)?;

    now.timezone()
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .ok_or(PublishTimeError::Format)
}

/// Reject anything not strictly after `now`, comparing full timestamps.
pub fn ensure_future(
    candidate: DateTime<Tz>,
    now: DateTime<Tz>,
) -> std::result::Result<(), PublishTimeError> {
    if candidate > now {
        Ok(())
    } else {
        Err(PublishTimeError::NotInFuture)
    }
}

pub fn parse_future_publish_time(
    input: &str,
    now: DateTime<Tz>,
) -> std::result::Result<DateTime<Tz>, PublishTimeError> {
    let candidate = parse_publish_time(input, now)?;
    ensure_future(candidate, now)?;
    Ok(candidate)
}
