//! Bounded-sleep polling
//!
//! Pool and queue operations report would-block conditions instead of
//! blocking, and the session loops retry them with a short sleep. The
//! defaults match the device query cadence: 100 us between attempts, give
//! up after 1000.

use std::thread;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_micros(100);
pub const MAX_POLL_ATTEMPTS: u32 = 1000;

/// Retry `f` until it yields a value or `attempts` sleeps have elapsed.
///
/// `f` runs once more than `attempts`: first immediately, then once after
/// each sleep.
pub fn poll_until<T, F>(attempts: u32, interval: Duration, mut f: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let mut remaining = attempts;
    loop {
        if let Some(value) = f() {
            return Some(value);
        }
        if remaining == 0 {
            return None;
        }
        remaining -= 1;
        thread::sleep(interval);
    }
}
