//! Deterministic clock for expiry/window tests — spec.md §8.4.
//!
//! Grounded on `mqk-integrity`'s "no wall-clock, caller supplies `now`"
//! discipline: every function under test that needs the current time takes
//! it as a parameter rather than calling `Utc::now()` itself, so tests drive
//! time explicitly instead of racing a real clock.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("fake clock mutex poisoned")
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("fake clock mutex poisoned");
        *guard += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("fake clock mutex poisoned") = to;
    }
}
