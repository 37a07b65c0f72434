use crate::error::CoreError;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Parse an IANA timezone name
pub fn parse_timezone(timezone: &str) -> Result<Tz, CoreError> {
    Tz::from_str(timezone).map_err(|_| CoreError::InvalidTimezone(timezone.to_string()))
}

/// Validate IANA timezone name
pub fn validate_timezone(timezone: &str) -> Result<(), CoreError> {
    parse_timezone(timezone).map(|_| ())
}

/// Resolve a local calendar date and time-of-day to a UTC instant in the
/// given zone.
///
/// DST transitions are handled explicitly: an ambiguous local time (fall
/// back) resolves to the earlier of the two instants, and a non-existent
/// local time (spring forward) shifts forward one hour into the gap's far
/// side. The reminder's own zone is always used here, never the device zone.
pub fn local_instant(
    date: NaiveDate,
    time: NaiveTime,
    timezone: &str,
) -> Result<DateTime<Utc>, CoreError> {
    let tz = parse_timezone(timezone)?;
    let naive = date.and_time(time);

    match tz.from_local_datetime(&naive).earliest() {
        Some(local_dt) => Ok(local_dt.with_timezone(&Utc)),
        None => {
            // Time doesn't exist (spring forward) - move to next valid time
            let shifted = time.overflowing_add_signed(Duration::hours(1)).0;
            let shifted_naive = date.and_time(shifted);
            tz.from_local_datetime(&shifted_naive)
                .earliest()
                .map(|local_dt| local_dt.with_timezone(&Utc))
                .ok_or_else(|| {
                    CoreError::InvalidInput(format!(
                        "No valid instant for {} {} in {}",
                        date, time, timezone
                    ))
                })
        }
    }
}

/// Project a UTC instant onto the local calendar of the given zone.
pub fn local_date_time(
    instant: DateTime<Utc>,
    timezone: &str,
) -> Result<(NaiveDate, NaiveTime), CoreError> {
    let tz = parse_timezone(timezone)?;
    let local = instant.with_timezone(&tz);
    Ok((local.date_naive(), local.time()))
}

/// UTC offset of the zone at the given instant, in minutes.
pub fn offset_minutes(timezone: &str, at_time: DateTime<Utc>) -> Result<i32, CoreError> {
    let tz = parse_timezone(timezone)?;
    let local = at_time.with_timezone(&tz);
    Ok(local.offset().fix().local_minus_utc() / 60)
}

/// Get timezone offset string for display (e.g., "-05:00")
pub fn offset_label(timezone: &str, at_time: DateTime<Utc>) -> Result<String, CoreError> {
    let tz = parse_timezone(timezone)?;
    let local = at_time.with_timezone(&tz);
    Ok(format!("{}", local.format("%:z")))
}

/// Get timezone abbreviation (e.g., "EST", "EDT")
pub fn abbreviation(timezone: &str, at_time: DateTime<Utc>) -> Result<String, CoreError> {
    let tz = parse_timezone(timezone)?;
    let local = at_time.with_timezone(&tz);
    Ok(format!("{}", local.format("%Z")))
}
