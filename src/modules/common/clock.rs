use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Mutex;

/// Time source injected through `CoreServices`.
///
/// `now` is the UTC instant used for log stamps and lifecycle
/// timestamps; `today` is the *local* civil date that daily limits
/// roll over on.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Settable clock for tests and deterministic replays.
pub struct ManualClock {
    instant: Mutex<DateTime<Utc>>,
    date: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(instant: DateTime<Utc>, date: NaiveDate) -> Self {
        Self {
            instant: Mutex::new(instant),
            date: Mutex::new(date),
        }
    }

    pub fn set_now(&self, instant: DateTime<Utc>) {
        *self.instant.lock().unwrap() = instant;
    }

    pub fn set_today(&self, date: NaiveDate) {
        *self.date.lock().unwrap() = date;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock().unwrap()
    }

    fn today(&self) -> NaiveDate {
        *self.date.lock().unwrap()
    }
}
