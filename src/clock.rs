use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local, TimeDelta};

/// Source of wall-clock time and of a monotonic reading for measuring intervals.
///
/// Periodic work (fade steps, health checks, stopwatch elapsed time) only ever
/// looks at [`Clock::elapsed`], so adjusting the system clock can't make a
/// ramp jump or a stopwatch go backwards.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
    /// time since an arbitrary fixed origin, never decreasing
    fn elapsed(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<(DateTime<Local>, Duration)>>,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(now: DateTime<Local>) -> Self {
        Self {
            inner: Arc::new(Mutex::new((now, Duration::ZERO))),
        }
    }

    /// moves both the wall clock and the monotonic reading forward
    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(delta) = TimeDelta::from_std(by) {
            inner.0 += delta;
        }
        inner.1 += by;
    }

    /// jumps the wall clock without touching the monotonic reading,
    /// like a user changing the system time
    pub fn set_wall_clock(&self, now: DateTime<Local>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0 = now;
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ManualClock")
            .field("now", &inner.0)
            .field("elapsed", &inner.1)
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).0
    }

    fn elapsed(&self) -> Duration {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).1
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let start = Local.with_ymd_and_hms(2024, 3, 1, 6, 59, 0).unwrap();
        let clock = ManualClock::starting_at(start);
        let other = clock.clone();

        clock.advance(Duration::from_secs(90));

        assert_eq!(other.now(), start + TimeDelta::seconds(90));
        assert_eq!(other.elapsed(), Duration::from_secs(90));
    }

    #[test]
    fn wall_clock_jump_leaves_elapsed_alone() {
        let start = Local.with_ymd_and_hms(2024, 3, 1, 6, 59, 0).unwrap();
        let clock = ManualClock::starting_at(start);
        clock.advance(Duration::from_secs(5));
        clock.set_wall_clock(start - TimeDelta::hours(3));

        assert_eq!(clock.elapsed(), Duration::from_secs(5));
        assert_eq!(clock.now(), start - TimeDelta::hours(3));
    }
}
