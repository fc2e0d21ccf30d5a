//! Wall-clock source for timestamps and loading identifiers.

use std::fmt::Debug;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, TimeZone};

/// Source of the current local time.
pub trait Clock: Send + Sync + Debug {
    /// Current local time.
    fn now(&self) -> DateTime<Local>;

    /// Milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A manually driven clock for deterministic rendering.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Local>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock pinned to a local calendar time.
    ///
    /// Falls back to the current time when the local time does not exist
    /// (DST gap).
    #[must_use]
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let now = Local
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .earliest()
            .unwrap_or_else(Local::now);
        Self::new(now)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
