use crate::error::CoreError;
use crate::timezone;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::sync::Mutex;

/// Clock/Timezone adapter.
///
/// The single source of "current time" for every other component, so tests
/// can inject fixed instants. Zone lookups are pure reads of the IANA table
/// and live here so callers never touch the device-local zone by accident.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// UTC offset of the zone at the given instant, in minutes.
    fn offset_minutes(&self, timezone: &str, at_time: DateTime<Utc>) -> Result<i32, CoreError> {
        timezone::offset_minutes(timezone, at_time)
    }

    /// Project an instant onto the local calendar of the given zone.
    fn local_date_time(
        &self,
        instant: DateTime<Utc>,
        timezone: &str,
    ) -> Result<(NaiveDate, NaiveTime), CoreError> {
        timezone::local_date_time(instant, timezone)
    }

    /// Today's calendar date in the given zone.
    fn today_in(&self, timezone: &str) -> Result<NaiveDate, CoreError> {
        self.local_date_time(self.now(), timezone).map(|(d, _)| d)
    }
}

/// Production clock reading system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock pinned to an injected instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
