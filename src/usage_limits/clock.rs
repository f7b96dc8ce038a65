use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Timelike};
use std::sync::{Arc, Mutex};

/// Source of "now" for every time-dependent decision in the engine
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Wall clock of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually driven clock for deterministic replays and tests
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Clock pinned to a local wall time, `None` if that time is ambiguous or skipped
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        Local
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .map(Self::new)
    }

    pub fn set(&self, to: DateTime<Local>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Calendar-day key in local time, e.g. `2026-10-17`
pub fn date_key(instant: &DateTime<Local>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

/// Local midnight that starts the day containing `instant`
pub fn start_of_day(instant: &DateTime<Local>) -> DateTime<Local> {
    let midnight = instant.date_naive().and_time(NaiveTime::MIN);
    // Midnight can fall inside a DST gap; fall back to the earliest valid instant
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| *instant - Duration::seconds(i64::from(instant.num_seconds_from_midnight())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at(2026, 6, 10, 9, 0).unwrap();
        let before = clock.now();
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now() - before, Duration::minutes(90));
    }

    #[test]
    fn test_date_key_format() {
        let clock = ManualClock::at(2026, 1, 5, 23, 59).unwrap();
        assert_eq!(date_key(&clock.now()), "2026-01-05");
    }

    #[test]
    fn test_start_of_day() {
        let clock = ManualClock::at(2026, 6, 10, 15, 30).unwrap();
        let midnight = start_of_day(&clock.now());
        assert_eq!(midnight.hour(), 0);
        assert_eq!(midnight.minute(), 0);
        assert_eq!(date_key(&midnight), "2026-06-10");
    }
}
